//! Error types for parabuild.

use thiserror::Error;

use crate::WorkerId;

/// Exit code used when no target survives filtering.
pub const EXIT_NOTHING_TO_BUILD: u8 = 15;
/// Exit code used when a target fails to build.
pub const EXIT_BUILD_FAILED: u8 = 31;
/// Exit code used when a worker process dies.
pub const EXIT_WORKER_DIED: u8 = 63;
/// Exit code for anything else.
pub const EXIT_UNKNOWN: u8 = 127;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Nothing to build")]
    NothingToBuild,

    #[error("Build of target \"{target}\" failed: {cause}")]
    BuildFailed { target: String, cause: String },

    #[error(
        "Worker {worker} exited: exit status = {}, signal = {}",
        fmt_opt(.exit_status),
        fmt_opt(.signal)
    )]
    WorkerDied {
        worker: WorkerId,
        exit_status: Option<i32>,
        signal: Option<i32>,
    },

    #[error("task queue is empty")]
    EmptyQueue,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("worker {0} disconnected")]
    Disconnected(WorkerId),

    #[error("failed to spawn worker {worker}: {message}")]
    Spawn { worker: WorkerId, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::NothingToBuild => EXIT_NOTHING_TO_BUILD,
            Error::BuildFailed { .. } => EXIT_BUILD_FAILED,
            Error::WorkerDied { .. } => EXIT_WORKER_DIED,
            _ => EXIT_UNKNOWN,
        }
    }

    /// Target this error originated from, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Error::BuildFailed { target, .. } => Some(target),
            _ => None,
        }
    }
}

fn fmt_opt(value: &Option<i32>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
