//! Scheduling for parabuild.
//!
//! Owns the queue of pending targets, drives a fixed-size pool of workers
//! through the launcher seam, and publishes everything that happens on an
//! event bus that reporters and the progress estimator subscribe to.

pub mod bus;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod queue;

#[cfg(test)]
mod testing;

pub use bus::{EventBus, Subscriber};
pub use orchestrator::{BuildOrchestrator, RunSummary};
pub use pool::{WorkerPool, WorkerState};
pub use progress::{Progress, ProgressEstimator, ProgressSnapshot};
pub use queue::TaskQueue;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
