//! Stack - The stack file and its immutable configuration
//!
//! A stack file holds three things: the configuration values shared by every
//! descriptor (the `config` binding), the backend block naming where state
//! lives, and the descriptor list itself.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::{Descriptor, Value};

/// Default stack file name
pub const DEFAULT_STACK_FILE: &str = "pyxis.stack.json";

/// Error loading or saving a stack file
#[derive(Debug, Error)]
pub enum StackError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// Shared configuration values, explicit and immutable
///
/// Descriptors reference these through the reserved `config` binding
/// (e.g. `${config.project}`); nothing reads them ambiently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Project name, used as the first component of the state identifier
    pub project: String,
    /// Environment name (e.g., "dev", "prod")
    pub environment: String,
    /// Region the stack's resources live in
    pub region: String,
    /// Additional configuration values exposed under the config binding
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub values: HashMap<String, Value>,
}

impl StackConfig {
    pub fn new(
        project: impl Into<String>,
        environment: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            region: region.into(),
            values: HashMap::new(),
        }
    }

    /// The state identifier this stack coordinates on
    pub fn state_id(&self) -> String {
        format!("{}/{}", self.project, self.environment)
    }

    /// Attribute map served under the reserved `config` binding
    pub fn binding_attributes(&self) -> HashMap<String, Value> {
        let mut attrs = self.values.clone();
        attrs.insert("project".to_string(), Value::String(self.project.clone()));
        attrs.insert(
            "environment".to_string(),
            Value::String(self.environment.clone()),
        );
        attrs.insert("region".to_string(), Value::String(self.region.clone()));
        attrs
    }
}

/// Backend block of the stack file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendBlock {
    /// Backend type (e.g., "s3", "local")
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Backend-specific attributes
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

/// A parsed stack file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    pub config: StackConfig,
    pub backend: BackendBlock,
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
}

impl Stack {
    /// Load a stack from a JSON file
    pub fn load(path: &Path) -> Result<Self, StackError> {
        let content = std::fs::read_to_string(path).map_err(|e| StackError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| StackError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Binding map seeded with the reserved config binding
    pub fn seed_bindings(&self) -> HashMap<String, HashMap<String, Value>> {
        let mut bindings = HashMap::new();
        bindings.insert(
            crate::graph::CONFIG_BINDING.to_string(),
            self.config.binding_attributes(),
        );
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK_JSON: &str = r#"{
        "config": {
            "project": "orbit",
            "environment": "dev",
            "region": "ap-northeast-1"
        },
        "backend": {
            "type": "s3",
            "attributes": {
                "bucket": "orbit-state",
                "lock_table": "orbit-locks",
                "region": "ap-northeast-1"
            }
        },
        "descriptors": [
            {
                "kind": "ecr.repository",
                "name": "app",
                "binding": "repo",
                "attributes": { "scan_on_push": true }
            }
        ]
    }"#;

    #[test]
    fn parse_stack_file() {
        let stack: Stack = serde_json::from_str(STACK_JSON).unwrap();
        assert_eq!(stack.config.project, "orbit");
        assert_eq!(stack.backend.backend_type, "s3");
        assert_eq!(stack.descriptors.len(), 1);
        assert_eq!(stack.descriptors[0].binding(), "repo");
    }

    #[test]
    fn state_id_combines_project_and_environment() {
        let config = StackConfig::new("orbit", "dev", "ap-northeast-1");
        assert_eq!(config.state_id(), "orbit/dev");
    }

    #[test]
    fn config_binding_exposes_locals() {
        let mut config = StackConfig::new("orbit", "prod", "us-east-1");
        config
            .values
            .insert("app_port".to_string(), Value::Int(8080));

        let attrs = config.binding_attributes();
        assert_eq!(attrs.get("project"), Some(&Value::String("orbit".into())));
        assert_eq!(attrs.get("app_port"), Some(&Value::Int(8080)));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Stack::load(Path::new("/nonexistent/pyxis.stack.json")).unwrap_err();
        assert!(matches!(err, StackError::Io { .. }));
    }
}
