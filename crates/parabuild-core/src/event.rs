//! Events published by the scheduler during a run.

use bytes::Bytes;

use crate::WorkerId;

/// Everything a reporter can observe about a run.
///
/// Lifecycle events carry the target they concern; `Stdout`/`Stderr` carry a
/// raw chunk of the worker's output attributed to the target it was building.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The scheduler is starting up.
    Init,
    /// A target was excluded by the include-filter.
    Skip { target: String },
    /// A target was added to the queue.
    Enqueue { target: String },
    /// Worker processes are being launched.
    Fork { count: usize },
    /// A worker completed its readiness handshake.
    WorkerReady { worker: WorkerId },
    /// Every worker is ready; dispatch begins.
    StartAll { total: usize, workers: usize },
    /// A target was dispatched to a worker.
    StartOne { target: String, worker: WorkerId },
    /// A target finished building successfully.
    FinishOne { target: String, worker: WorkerId },
    /// The queue is drained and no build is in flight.
    FinishAll,
    Stdout { target: String, data: Bytes },
    Stderr { target: String, data: Bytes },
    /// All workers exited cleanly.
    Done,
    /// The run is terminating with an error.
    Fatal {
        message: String,
        target: Option<String>,
        exit_code: u8,
    },
}

impl Event {
    /// Build a `Fatal` event from a scheduler error.
    pub fn fatal(error: &crate::Error) -> Self {
        Event::Fatal {
            message: error.to_string(),
            target: error.target().map(str::to_string),
            exit_code: error.exit_code(),
        }
    }

    /// Stable name of the event kind, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Init => "init",
            Event::Skip { .. } => "skip",
            Event::Enqueue { .. } => "enqueue",
            Event::Fork { .. } => "fork",
            Event::WorkerReady { .. } => "worker-ready",
            Event::StartAll { .. } => "start-all",
            Event::StartOne { .. } => "start-one",
            Event::FinishOne { .. } => "finish-one",
            Event::FinishAll => "finish-all",
            Event::Stdout { .. } => "stdout",
            Event::Stderr { .. } => "stderr",
            Event::Done => "done",
            Event::Fatal { .. } => "fatal",
        }
    }
}
