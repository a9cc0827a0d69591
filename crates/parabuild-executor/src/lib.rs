//! Build execution and worker process plumbing for parabuild.
//!
//! Provides:
//! - `CommandBuilder`, which runs a target's shell commands
//! - The worker-side message loop (`serve`, `run_worker`)
//! - `ProcessLauncher`, which starts workers as child processes

pub mod command;
pub mod process;
pub mod worker;

pub use command::CommandBuilder;
pub use process::ProcessLauncher;
pub use worker::{WorkerContext, WorkerEnv, run_worker, serve};
