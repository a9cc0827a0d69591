//! `${...}` substitution in build commands, target directories and env values.
//!
//! | variable | value |
//! |---|---|
//! | `${target.name}` | target being built |
//! | `${target.dir}` | target directory as written in the build file, `.` if unset |
//! | `${run.id}` | id of the build run |
//! | `${worker.id}` | slot of the worker performing the build |
//! | `${env.NAME}` | variable from the worker's environment |
//! | `${timestamp}`, `${date}`, `${datetime}` | UTC clock at substitution time |
//! | `${NAME}` | user-defined |
//!
//! Anything that does not resolve is left as written, so shell syntax such as
//! `${HOME}` reaches the shell untouched when no variable of that name exists.

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::LazyLock;

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TargetVars {
    name: String,
    dir: String,
}

/// Values available for substitution.
///
/// A worker builds one context at startup (run, worker, environment) and
/// derives a per-target copy with [`VariableContext::for_target`].
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    run_id: Option<String>,
    worker_id: Option<String>,
    target: Option<TargetVars>,
    env: HashMap<String, String>,
    defined: HashMap<String, String>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, id: impl Display) -> Self {
        self.run_id = Some(id.to_string());
        self
    }

    pub fn with_worker_id(mut self, id: impl Display) -> Self {
        self.worker_id = Some(id.to_string());
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Make the current process environment available as `${env.*}`.
    /// Variables already set on the context win.
    pub fn with_process_env(mut self) -> Self {
        for (key, value) in std::env::vars() {
            self.env.entry(key).or_insert(value);
        }
        self
    }

    /// Define `${name}`.
    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defined.insert(name.into(), value.into());
        self
    }

    /// Copy of this context for building `name`.
    pub fn for_target(&self, name: &str, dir: Option<&str>) -> Self {
        let mut ctx = self.clone();
        ctx.target = Some(TargetVars {
            name: name.to_string(),
            dir: dir.unwrap_or(".").to_string(),
        });
        ctx
    }

    /// Value of one variable, `None` when it does not resolve.
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.lookup_at(name, Utc::now())
    }

    fn lookup_at(&self, name: &str, now: DateTime<Utc>) -> Option<String> {
        match name.split_once('.') {
            Some(("target", "name")) => self.target.as_ref().map(|t| t.name.clone()),
            Some(("target", "dir")) => self.target.as_ref().map(|t| t.dir.clone()),
            Some(("run", "id")) => self.run_id.clone(),
            Some(("worker", "id")) => self.worker_id.clone(),
            Some(("env", key)) => self.env.get(key).cloned(),
            Some(_) => None,
            None => match name {
                "timestamp" => Some(now.timestamp().to_string()),
                "date" => Some(now.format("%Y-%m-%d").to_string()),
                "datetime" => Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                other => self.defined.get(other).cloned(),
            },
        }
    }

    /// Substitute every resolvable variable in `input`.
    ///
    /// The clock is read once per call, so `${date}` and `${timestamp}` in
    /// the same string agree.
    pub fn expand(&self, input: &str) -> String {
        let now = Utc::now();
        VAR_REGEX
            .replace_all(input, |caps: &Captures| {
                self.lookup_at(&caps[1], now)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    pub fn expand_all(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.expand(s)).collect()
    }

    /// Expand the values of an environment map, keys are kept as is.
    pub fn expand_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .map(|(key, value)| (key.clone(), self.expand(value)))
            .collect()
    }
}
