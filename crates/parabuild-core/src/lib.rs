//! Core domain types and traits for parabuild.
//!
//! This crate contains:
//! - Run and worker identifiers
//! - Tasks and their opaque build parameters
//! - The scheduler <-> worker IPC protocol
//! - The event vocabulary published by the scheduler
//! - Builder and launcher traits implemented by the executor crate

pub mod builder;
pub mod error;
pub mod event;
pub mod id;
pub mod ipc;
pub mod launcher;
pub mod task;

pub use builder::Builder;
pub use error::{Error, Result};
pub use event::Event;
pub use id::{RunId, WorkerId};
pub use launcher::{
    Launcher, LogStream, PoolSinks, PoolStreams, WorkerEndpoint, WorkerExit, WorkerOutput,
};
pub use task::{BuildParams, Task};
