mod agent;
mod compaction;
mod llm;
mod permissions;
mod tools;
mod worker;

pub use agent::*;
pub use compaction::*;
pub use llm::*;
pub use permissions::*;
pub use tools::*;
pub use worker::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let (Some(ctx), Some(out)) = (self.llm.context_window_tokens, self.llm.max_output_tokens) {
            if out >= ctx {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "llm.max_output_tokens".into(),
                    message: format!(
                        "max_output_tokens ({out}) must be smaller than context_window_tokens ({ctx})"
                    ),
                });
            }
        }

        if self.llm.script_path.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.script_path".into(),
                message: "scripted provider has no script; the model will produce empty turns".into(),
            });
        }

        if !(0.0..1.0).contains(&self.compaction.buffer_ratio) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "compaction.buffer_ratio".into(),
                message: "buffer_ratio must be in [0, 1)".into(),
            });
        }

        if self.retry.backoff_multiplier < 1.0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "retry.backoff_multiplier".into(),
                message: "backoff_multiplier must be >= 1".into(),
            });
        }

        if self.agent.max_tool_loops == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "agent.max_tool_loops".into(),
                message: "max_tool_loops must be greater than 0".into(),
            });
        }

        if self.worker.max_concurrency == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "worker.max_concurrency".into(),
                message: "max_concurrency must be greater than 0".into(),
            });
        }

        for (i, pattern) in self.tools.exec_security.denied_patterns.iter().enumerate() {
            if pattern.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("tools.exec_security.denied_patterns[{i}]"),
                    message: "empty pattern matches every command".into(),
                });
            }
        }

        errors
    }

    /// True when `validate` reported at least one error-severity issue.
    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error)
    }
}
