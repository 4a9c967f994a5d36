use std::time::Duration;

/// Shared error type used across all SerialCode crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("timeout: {0}")]
    Timeout(String),

    /// A provider call failed. `status` and `retry_after` are filled in when
    /// the provider surfaced them; the retry layer reads both.
    #[error("provider {provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },

    #[error("config: {0}")]
    Config(String),

    /// Malformed permission pattern (e.g. unbalanced parentheses).
    #[error("invalid permission pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("auth: {0}")]
    Auth(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("service {name}: {message}")]
    Service { name: String, message: String },

    /// Headless runs cannot ask the user; the tool needs an explicit allow.
    #[error("tool '{tool}' requires permission; rerun with --allow \"{tool}\" to permit it")]
    PermissionRequired { tool: String },

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("worker: {0}")]
    Worker(String),

    #[error("git: {0}")]
    Git(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for provider failures without HTTP metadata.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
