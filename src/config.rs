//! AD-011: Runtime configuration.
//!
//! Loaded from YAML, independent of the declaration:
//! - `concurrency`: in-flight record pipelines (>= 1)
//! - `timeout_ms`: per-inference-call timeout (>= 1)
//! - `run_label`: optional prefix for generated run ids

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub run_label: Option<String>,
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_ms: default_timeout_ms(),
            run_label: None,
        }
    }
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parse from a YAML string and validate.
    pub fn parse(yaml: &str) -> Result<Self, Error> {
        let config: RuntimeConfig =
            serde_yaml_ng::from_str(yaml).map_err(|e| Error::Config(format!("YAML parse error: {}", e)))?;
        let errors = config.validate();
        if !errors.is_empty() {
            let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(Error::Config(joined.join("; ")));
        }
        Ok(config)
    }

    /// Load from a YAML file on disk.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Returns a list of errors (empty = valid).
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.concurrency == 0 {
            errors.push(ValidationError {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            errors.push(ValidationError {
                message: "timeout_ms must be at least 1".to_string(),
            });
        }
        if let Some(label) = &self.run_label {
            if label.is_empty() || label.chars().any(char::is_whitespace) {
                errors.push(ValidationError {
                    message: format!("run_label '{}' must be non-empty without whitespace", label),
                });
            }
        }
        errors
    }
}
