use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::sandbox::ResourceLimits;

pub const ENV_INTERPRETER: &str = "VALIDATED_REPL_PYTHON";
pub const ENV_TIMEOUT_MS: &str = "VALIDATED_REPL_TIMEOUT_MS";
pub const ENV_EXECUTE_SANITIZED: &str = "VALIDATED_REPL_EXECUTE_SANITIZED";
pub const ENV_MODE: &str = "VALIDATED_REPL_MODE";

/// How interpreter processes map to calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplMode {
    /// One long-lived interpreter; globals carry over between calls.
    #[default]
    Persistent,
    /// A new interpreter for every call.
    Fresh,
}

/// What the tool does with the sanitizer's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizedInput {
    /// Run the sanitizer for its side effects (rejecting input) but execute
    /// the query exactly as received.
    #[default]
    Discard,
    /// Execute the sanitizer's output.
    Execute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    pub interpreter: String,
    /// Extra interpreter flags, placed before the ones the engine adds.
    pub args: Vec<String>,
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub limits: Option<ResourceLimits>,
    pub mode: ReplMode,
    pub sanitized_input: SanitizedInput,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            args: Vec::new(),
            timeout_ms: 30_000,
            working_dir: None,
            env: BTreeMap::new(),
            limits: Some(ResourceLimits::default()),
            mode: ReplMode::Persistent,
            sanitized_input: SanitizedInput::Discard,
        }
    }
}

impl ReplConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ToolError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ToolError::Validation(format!("Invalid REPL config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `VALIDATED_REPL_*` environment variables.
    pub fn from_env() -> Result<Self, ToolError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ToolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interpreter) = lookup(ENV_INTERPRETER) {
            self.interpreter = interpreter;
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = raw.trim().parse().map_err(|_| {
                ToolError::Validation(format!("{} must be an integer, got {:?}", ENV_TIMEOUT_MS, raw))
            })?;
        }

        if let Some(raw) = lookup(ENV_EXECUTE_SANITIZED) {
            self.sanitized_input = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => SanitizedInput::Execute,
                "0" | "false" | "no" => SanitizedInput::Discard,
                _ => {
                    return Err(ToolError::Validation(format!(
                        "{} must be a boolean, got {:?}",
                        ENV_EXECUTE_SANITIZED, raw
                    )))
                }
            };
        }

        if let Some(raw) = lookup(ENV_MODE) {
            self.mode = match raw.trim().to_ascii_lowercase().as_str() {
                "persistent" => ReplMode::Persistent,
                "fresh" => ReplMode::Fresh,
                _ => {
                    return Err(ToolError::Validation(format!(
                        "{} must be \"persistent\" or \"fresh\", got {:?}",
                        ENV_MODE, raw
                    )))
                }
            };
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ToolError> {
        if self.interpreter.trim().is_empty() {
            return Err(ToolError::Validation("Interpreter must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ToolError::Validation("timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }
}
