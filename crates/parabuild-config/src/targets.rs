//! Build-file parsing.
//!
//! A build file declares the targets of a run in the order they should be
//! enqueued:
//!
//! ```kdl
//! concurrency 4
//! env { NODE_ENV "production" }
//! target "app" dir="packages/app" {
//!     run "npm run build"
//!     env { DEBUG "0" }
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use parabuild_core::{BuildParams, Task};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Parsed build file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildFile {
    /// Preferred worker count, if the file sets one.
    pub concurrency: Option<usize>,
    /// Environment shared by every target.
    pub env: HashMap<String, String>,
    /// Targets in declaration order.
    pub targets: Vec<TargetDef>,
}

/// One declared target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDef {
    pub name: String,
    pub spec: TargetSpec,
}

/// What a worker needs to build a target. Carried as the task's build params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub commands: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl BuildFile {
    /// Target names in declaration order.
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.name.as_str())
    }

    /// Turn the declared targets into tasks. File-level env is merged into
    /// each target, with the target's own entries taking precedence.
    pub fn tasks(&self) -> ConfigResult<Vec<Task>> {
        self.targets
            .iter()
            .map(|target| {
                let mut spec = target.spec.clone();
                for (key, value) in &self.env {
                    spec.env
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                let params = BuildParams::new(serde_json::to_value(&spec)?);
                Ok(Task::new(target.name.clone(), params))
            })
            .collect()
    }
}

/// Read and parse a build file from disk.
pub fn load_build_file(path: impl AsRef<Path>) -> ConfigResult<BuildFile> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), "Loaded build file");
    parse_build_file(&text)
}

/// Parse a build file from KDL text.
pub fn parse_build_file(kdl: &str) -> ConfigResult<BuildFile> {
    let doc: KdlDocument = kdl.parse()?;

    let mut build_file = BuildFile::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "concurrency" => {
                build_file.concurrency = Some(parse_concurrency(node)?);
            }
            "env" => {
                build_file.env.extend(parse_env_block(node));
            }
            "target" => {
                let target = parse_target(node)?;
                if !seen.insert(target.name.clone()) {
                    return Err(ConfigError::Duplicate(format!("target '{}'", target.name)));
                }
                build_file.targets.push(target);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(build_file)
}

fn parse_concurrency(node: &KdlNode) -> ConfigResult<usize> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField("concurrency value".to_string()))?
        .value();

    match value.as_integer() {
        Some(n) if n >= 1 => usize::try_from(n).map_err(|_| ConfigError::InvalidValue {
            field: "concurrency".to_string(),
            message: format!("{} is out of range", n),
        }),
        Some(n) => Err(ConfigError::InvalidValue {
            field: "concurrency".to_string(),
            message: format!("must be at least 1, got {}", n),
        }),
        None => Err(ConfigError::InvalidValue {
            field: "concurrency".to_string(),
            message: format!("expected an integer, got {}", value),
        }),
    }
}

fn parse_target(node: &KdlNode) -> ConfigResult<TargetDef> {
    let name = get_first_string_arg(node)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ConfigError::MissingField("target name".to_string()))?;

    let dir = get_string_prop(node, "dir");
    let mut commands = Vec::new();
    let mut env = HashMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "run" => {
                    commands.extend(get_all_string_args(child));
                }
                "env" => {
                    env.extend(parse_env_block(child));
                }
                _ => {}
            }
        }
    }

    if commands.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "run command for target '{}'",
            name
        )));
    }

    Ok(TargetDef {
        name,
        spec: TargetSpec { commands, env, dir },
    })
}

fn parse_env_block(node: &KdlNode) -> HashMap<String, String> {
    let mut env = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            if let Some(val) = get_first_string_arg(child) {
                env.insert(key, val);
            }
        }
    }
    env
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_build_file() {
        let kdl = r#"
            target "app" {
                run "make app"
            }
        "#;

        let file = parse_build_file(kdl).unwrap();
        assert_eq!(file.concurrency, None);
        assert_eq!(file.targets.len(), 1);
        assert_eq!(file.targets[0].name, "app");
        assert_eq!(file.targets[0].spec.commands, vec!["make app"]);
        assert_eq!(file.targets[0].spec.dir, None);
    }

    #[test]
    fn test_targets_keep_declaration_order() {
        let kdl = r#"
            target "c" { run "echo c" }
            target "a" { run "echo a" }
            target "b" { run "echo b" }
        "#;

        let file = parse_build_file(kdl).unwrap();
        let names: Vec<&str> = file.target_names().collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_parse_full_build_file() {
        let kdl = r#"
            concurrency 4
            env {
                NODE_ENV "production"
            }
            target "app" dir="packages/app" {
                run "npm ci"
                run "npm run build"
                env {
                    DEBUG "0"
                }
            }
        "#;

        let file = parse_build_file(kdl).unwrap();
        assert_eq!(file.concurrency, Some(4));
        assert_eq!(file.env.get("NODE_ENV"), Some(&"production".to_string()));

        let app = &file.targets[0];
        assert_eq!(app.spec.dir.as_deref(), Some("packages/app"));
        assert_eq!(app.spec.commands, vec!["npm ci", "npm run build"]);
        assert_eq!(app.spec.env.get("DEBUG"), Some(&"0".to_string()));
    }

    #[test]
    fn test_tasks_merge_env() {
        let kdl = r#"
            env {
                MODE "release"
                SHARED "file"
            }
            target "lib" {
                run "make"
                env {
                    SHARED "target"
                }
            }
        "#;

        let file = parse_build_file(kdl).unwrap();
        let tasks = file.tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].target, "lib");

        let spec: TargetSpec = tasks[0].params.parse().unwrap();
        assert_eq!(spec.commands, vec!["make"]);
        assert_eq!(spec.env.get("MODE"), Some(&"release".to_string()));
        assert_eq!(spec.env.get("SHARED"), Some(&"target".to_string()));
    }

    #[test]
    fn test_duplicate_target() {
        let kdl = r#"
            target "a" { run "echo 1" }
            target "a" { run "echo 2" }
        "#;

        let result = parse_build_file(kdl);
        assert!(matches!(result.unwrap_err(), ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_target_without_run() {
        let kdl = r#"
            target "empty" dir="x"
        "#;

        let result = parse_build_file(kdl);
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }

    #[test]
    fn test_target_without_name() {
        let kdl = r#"
            target { run "make" }
        "#;

        let result = parse_build_file(kdl);
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }

    #[test]
    fn test_invalid_concurrency() {
        let zero = parse_build_file("concurrency 0");
        assert!(matches!(
            zero.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));

        let text = parse_build_file(r#"concurrency "many""#);
        assert!(matches!(
            text.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_parse_error() {
        let result = parse_build_file(r#"target "a" {"#);
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_build_file("/nonexistent/parabuild.kdl");
        assert!(matches!(result.unwrap_err(), ConfigError::Io { .. }));
    }
}
