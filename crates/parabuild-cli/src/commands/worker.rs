//! Hidden `worker` subcommand: the child side of a build run.

use anyhow::{Context, Result};
use parabuild_config::VariableContext;
use parabuild_executor::{CommandBuilder, WorkerEnv, run_worker};
use tracing::debug;

pub async fn run() -> Result<()> {
    let env = WorkerEnv::from_env().context("Invalid worker environment")?;
    debug!(worker = %env.id, run_id = %env.context.run_id, "Worker starting");

    let vars = VariableContext::new()
        .with_run_id(env.context.run_id)
        .with_worker_id(env.id)
        .with_process_env();

    let builder = CommandBuilder::new(&env.context.base_dir).with_variables(vars);
    run_worker(&env, &builder)
        .await
        .with_context(|| format!("Worker {} failed", env.id))?;
    Ok(())
}
