//! KDL configuration parsing for parabuild.
//!
//! This crate handles parsing of:
//! - Build files (parabuild.kdl) and the targets they declare
//! - `${...}` variable substitution

pub mod error;
pub mod targets;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use targets::{BuildFile, TargetDef, TargetSpec, load_build_file, parse_build_file};
pub use variables::VariableContext;
