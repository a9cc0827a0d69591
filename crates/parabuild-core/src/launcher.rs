//! Launcher trait and the channels connecting a worker to the scheduler.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ipc::{Reply, Request};
use crate::{Result, WorkerId};

/// Which output pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A chunk of raw output from a worker process.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub worker: WorkerId,
    pub stream: LogStream,
    pub data: Bytes,
}

/// Notification that a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub worker: WorkerId,
    pub exit_status: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    /// Build from a process exit status.
    pub fn from_status(worker: WorkerId, status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            worker,
            exit_status: status.code(),
            signal,
        }
    }

    /// True if the process exited on its own with status zero.
    pub fn is_clean(&self) -> bool {
        self.exit_status == Some(0) && self.signal.is_none()
    }
}

/// Shared sinks every launched worker reports into.
///
/// Output and exit notifications from all workers are funnelled into one
/// channel each, so the scheduler can watch the whole pool from one place.
#[derive(Debug, Clone)]
pub struct PoolSinks {
    pub output: mpsc::UnboundedSender<WorkerOutput>,
    pub exits: mpsc::UnboundedSender<WorkerExit>,
}

/// Receiving halves matching a [`PoolSinks`].
#[derive(Debug)]
pub struct PoolStreams {
    pub output: mpsc::UnboundedReceiver<WorkerOutput>,
    pub exits: mpsc::UnboundedReceiver<WorkerExit>,
}

impl PoolSinks {
    pub fn channel() -> (PoolSinks, PoolStreams) {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        (
            PoolSinks {
                output: output_tx,
                exits: exits_tx,
            },
            PoolStreams {
                output: output_rx,
                exits: exits_rx,
            },
        )
    }
}

/// Scheduler-side end of one worker's message channel.
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub id: WorkerId,
    pub requests: mpsc::UnboundedSender<Request>,
    pub replies: mpsc::UnboundedReceiver<Reply>,
}

impl WorkerEndpoint {
    /// Create an endpoint together with the worker-side halves.
    pub fn pair(
        id: WorkerId,
    ) -> (
        WorkerEndpoint,
        mpsc::UnboundedReceiver<Request>,
        mpsc::UnboundedSender<Reply>,
    ) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        (
            WorkerEndpoint {
                id,
                requests: request_tx,
                replies: reply_rx,
            },
            request_rx,
            reply_tx,
        )
    }
}

/// Trait for starting worker processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Name of this launcher.
    fn name(&self) -> &'static str;

    /// Start one worker. The worker reports output and its eventual exit
    /// into `sinks`; messages flow through the returned endpoint.
    async fn launch(&self, worker: WorkerId, sinks: PoolSinks) -> Result<WorkerEndpoint>;
}
