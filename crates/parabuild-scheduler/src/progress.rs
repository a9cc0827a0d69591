//! Completion estimate for a running build.
//!
//! The estimate simulates the rest of the run: every busy worker finishes
//! its current target after a pessimistic duration, and every target still
//! in the queue goes to whichever worker would free up first. The result is
//! only ever shown to the user; it never feeds back into scheduling.

use parabuild_core::{Event, WorkerId};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{Subscriber, lock};

/// Multiplier applied to a running target that already took longer than
/// any finished one.
const OVERSHOOT: f64 = 1.25;

#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    task_times: Vec<Duration>,
    worker_starts: Vec<Option<Instant>>,
    total: usize,
    running: usize,
    start_time: Option<Instant>,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch is starting with `total` targets over `workers` workers.
    pub fn start_all_at(&mut self, total: usize, workers: usize, at: Instant) {
        self.total = total;
        self.worker_starts = vec![None; workers];
        self.start_time = Some(at);
    }

    pub fn record_start_at(&mut self, worker: WorkerId, at: Instant) {
        let slot = worker.slot();
        if slot >= self.worker_starts.len() {
            self.worker_starts.resize(slot + 1, None);
        }
        if self.worker_starts[slot].replace(at).is_none() {
            self.running += 1;
        }
    }

    pub fn record_finish_at(&mut self, worker: WorkerId, at: Instant) {
        let started = self
            .worker_starts
            .get_mut(worker.slot())
            .and_then(Option::take);
        if let Some(started) = started {
            self.task_times.push(at.saturating_duration_since(started));
            self.running = self.running.saturating_sub(1);
        }
    }

    /// Apply a bus event observed at `at`.
    pub fn observe_at(&mut self, event: &Event, at: Instant) {
        match event {
            Event::StartAll { total, workers } => self.start_all_at(*total, *workers, at),
            Event::StartOne { worker, .. } => self.record_start_at(*worker, at),
            Event::FinishOne { worker, .. } => self.record_finish_at(*worker, at),
            _ => {}
        }
    }

    pub fn total_task_count(&self) -> usize {
        self.total
    }

    pub fn running_task_count(&self) -> usize {
        self.running
    }

    pub fn completed_task_count(&self) -> usize {
        self.task_times.len()
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    /// Time since dispatch began, zero before that.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        self.start_time
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Estimated time until the last target finishes, or `None` until at
    /// least one target has completed.
    pub fn estimate_remaining_at(&self, now: Instant) -> Option<Duration> {
        if self.task_times.is_empty() {
            return None;
        }

        let completed: Vec<f64> = self.task_times.iter().map(Duration::as_secs_f64).collect();
        let neutral = mean(&completed);
        let max_so_far = completed.iter().copied().fold(0.0, f64::max);

        let elapsed: Vec<Option<f64>> = self
            .worker_starts
            .iter()
            .map(|start| start.map(|s| now.saturating_duration_since(s).as_secs_f64()))
            .collect();

        let mut samples = completed.clone();
        samples.extend(
            elapsed
                .iter()
                .flatten()
                .filter(|e| **e > max_so_far)
                .map(|e| e * OVERSHOOT),
        );
        let pessimistic = mean(&samples);

        let mut projections: Vec<f64> = elapsed
            .iter()
            .map(|e| match e {
                Some(e) => (pessimistic - e).max(0.0),
                None => 0.0,
            })
            .collect();
        if projections.is_empty() {
            projections.push(0.0);
        }

        let undispatched = self
            .total
            .saturating_sub(self.completed_task_count() + self.running);
        for _ in 0..undispatched {
            let mut next = 0;
            for (i, projection) in projections.iter().enumerate() {
                if *projection < projections[next] {
                    next = i;
                }
            }
            projections[next] += neutral;
        }

        let remaining = projections.iter().copied().fold(0.0, f64::max);
        Some(Duration::from_secs_f64(remaining))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub elapsed: Duration,
    pub remaining: Option<Duration>,
}

/// Shared estimator fed from the event bus.
///
/// Subscribe a clone to the bus; read it from anywhere with [`Progress::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct Progress {
    inner: Arc<Mutex<ProgressEstimator>>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> ProgressSnapshot {
        let estimator = lock(&self.inner);
        ProgressSnapshot {
            total: estimator.total_task_count(),
            running: estimator.running_task_count(),
            completed: estimator.completed_task_count(),
            elapsed: estimator.elapsed_at(now),
            remaining: estimator.estimate_remaining_at(now),
        }
    }
}

impl Subscriber for Progress {
    fn on_event(&mut self, event: &Event) {
        lock(&self.inner).observe_at(event, Instant::now());
    }
}
