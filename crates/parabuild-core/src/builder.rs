//! Builder trait.
//!
//! A builder performs one build inside a worker process. Output is written
//! straight to the worker's stdout/stderr, which the scheduler captures.

use async_trait::async_trait;

use crate::{BuildParams, Result};

/// Trait for build backends.
///
/// Implementations must not keep state between calls that would make two
/// builds of different targets observably dependent on each other.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Name of this builder.
    fn name(&self) -> &'static str;

    /// Build `target`. An `Err` is reported back to the scheduler as a
    /// failed result carrying the error's message.
    async fn build(&self, target: &str, params: &BuildParams) -> Result<()>;
}
