//! Tasks and their build parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Build parameters for one target.
///
/// Opaque to the scheduler: produced by the target enumeration step and only
/// interpreted by the builder inside a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildParams(Value);

impl BuildParams {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Serialize any value into build parameters.
    pub fn from_serializable<T: Serialize>(value: &T) -> crate::Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Deserialize the parameters into a concrete type.
    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> crate::Result<T> {
        Ok(T::deserialize(&self.0)?)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for BuildParams {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// One unit of work: build `target` with `params`.
///
/// Identity is the target name, which is unique within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub target: String,
    pub params: BuildParams,
}

impl Task {
    pub fn new(target: impl Into<String>, params: BuildParams) -> Self {
        Self {
            target: target.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Spec {
        commands: Vec<String>,
    }

    #[test]
    fn test_params_parse() {
        let params = BuildParams::new(json!({ "commands": ["make"] }));
        let spec: Spec = params.parse().unwrap();
        assert_eq!(spec.commands, vec!["make"]);
    }

    #[test]
    fn test_params_parse_mismatch() {
        let params = BuildParams::new(json!({ "commands": 3 }));
        assert!(params.parse::<Spec>().is_err());
    }
}
