//! Shell command builder.

use async_trait::async_trait;
use parabuild_config::{TargetSpec, VariableContext};
use parabuild_core::{BuildParams, Builder, Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs a target's commands with `/bin/sh -c`.
///
/// Commands are joined with `&&`, so the first failing command stops the
/// build. The child inherits the worker's stdout and stderr.
pub struct CommandBuilder {
    base_dir: PathBuf,
    shell: PathBuf,
    vars: VariableContext,
}

impl CommandBuilder {
    /// Create a builder resolving target directories against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            shell: PathBuf::from("/bin/sh"),
            vars: VariableContext::new(),
        }
    }

    /// Variables available to every command (run id, worker id, env...).
    pub fn with_variables(mut self, vars: VariableContext) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn build(&self, target: &str, params: &BuildParams) -> Result<()> {
        let spec: TargetSpec = params.parse().map_err(|e| {
            Error::InvalidInput(format!("bad build parameters for {}: {}", target, e))
        })?;

        if spec.commands.is_empty() {
            return Err(Error::InvalidInput(format!(
                "target {} has no commands",
                target
            )));
        }

        let vars = self.vars.for_target(target, spec.dir.as_deref());
        let script = vars.expand_all(&spec.commands).join(" && ");
        let env = vars.expand_env(&spec.env);
        let dir = match &spec.dir {
            Some(dir) => self.base_dir.join(vars.expand(dir)),
            None => self.base_dir.clone(),
        };

        info!(build_target = %target, dir = %dir.display(), "Running build commands");
        debug!(script = %script, "Shell script");

        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(&script)
            .current_dir(&dir)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                Error::ExecutionFailed(format!(
                    "failed to run {} in {}: {}",
                    self.shell.display(),
                    dir.display(),
                    e
                ))
            })?;

        if status.success() {
            return Ok(());
        }

        match status.code() {
            Some(code) => Err(Error::ExecutionFailed(format!(
                "command exited with status {}",
                code
            ))),
            None => Err(Error::ExecutionFailed(
                "command terminated by signal".to_string(),
            )),
        }
    }
}
