//! Scheduler <-> worker message protocol.
//!
//! Every message is an envelope `{"type": ..., "detail": ...}` serialized as
//! one JSON object per line. For a given worker the exchange always reads
//! `ready, (build, result)*, exit`.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{BuildParams, Error, Result, Task};

/// Message sent from the scheduler to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum Request {
    /// Perform one build.
    Build(BuildRequest),
    /// No more work; the worker must terminate.
    Exit,
}

/// Message sent from a worker to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum Reply {
    /// Worker finished initialization.
    Ready,
    /// Outcome of the most recent build request.
    Result(BuildOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub target: String,
    #[serde(rename = "buildParams")]
    pub params: BuildParams,
}

impl From<Task> for BuildRequest {
    fn from(task: Task) -> Self {
        Self {
            target: task.target,
            params: task.params,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub error: Option<String>,
}

impl BuildOutcome {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }
}

impl Request {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Build(_) => "build",
            Request::Exit => "exit",
        }
    }
}

impl Reply {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Ready => "ready",
            Reply::Result(_) => "result",
        }
    }
}

/// Encode a message as a newline-terminated JSON line.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

/// Decode one JSON line into a message.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(Error::Protocol("empty message".to_string()));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| Error::Protocol(format!("malformed message: {}", e)))
}
