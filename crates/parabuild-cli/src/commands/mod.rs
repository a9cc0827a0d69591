//! CLI command implementations.

pub mod build;
pub mod worker;

use anyhow::{Context, Result};
use parabuild_config::load_build_file;
use parabuild_core::error::EXIT_UNKNOWN;
use std::path::Path;

/// Print target names in the order they would be queued.
pub fn list(path: &Path) -> Result<()> {
    let build_file = load_build_file(path)
        .with_context(|| format!("Failed to load build file {}", path.display()))?;
    for name in build_file.target_names() {
        println!("{}", name);
    }
    Ok(())
}

/// Check that the build file parses and every target can be turned into a task.
pub fn validate(path: &Path) -> Result<()> {
    let build_file = load_build_file(path)
        .with_context(|| format!("Failed to load build file {}", path.display()))?;
    let tasks = build_file.tasks().context("Failed to prepare targets")?;
    println!(
        "Build file is valid: {} target(s){}",
        tasks.len(),
        build_file
            .concurrency
            .map(|n| format!(", concurrency {}", n))
            .unwrap_or_default()
    );
    Ok(())
}

/// Process exit code for an error: the scheduler's code if it came from
/// there, the generic one otherwise.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<parabuild_core::Error>()
        .map(parabuild_core::Error::exit_code)
        .unwrap_or(EXIT_UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parabuild_core::Error;

    #[test]
    fn test_exit_code_mapping() {
        let failed = anyhow::Error::from(Error::BuildFailed {
            target: "a".to_string(),
            cause: "boom".to_string(),
        });
        assert_eq!(exit_code(&failed), 31);

        let nothing = anyhow::Error::from(Error::NothingToBuild).context("while building");
        assert_eq!(exit_code(&nothing), 15);

        let other = anyhow::anyhow!("config is broken");
        assert_eq!(exit_code(&other), 127);
    }
}
