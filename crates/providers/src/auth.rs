//! Credential resolution for the configured provider.

use sc_domain::config::LlmConfig;
use sc_domain::error::{Error, Result};

/// Resolved provider credentials.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Resolve credentials from the environment variable named in `api_key_env`.
///
/// No variable configured means the provider needs no key. A configured but
/// unset (or empty) variable is an auth error.
pub fn resolve_credentials(llm: &LlmConfig) -> Result<Credentials> {
    let Some(env_var) = llm.api_key_env.as_deref() else {
        return Ok(Credentials::default());
    };
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => {
            tracing::debug!(env_var = %env_var, "API key resolved from environment");
            Ok(Credentials {
                api_key: Some(value),
            })
        }
        _ => Err(Error::Auth(format!(
            "environment variable '{env_var}' not set or empty"
        ))),
    }
}
