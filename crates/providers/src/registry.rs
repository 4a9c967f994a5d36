//! Provider construction from configuration.

use std::sync::Arc;

use sc_domain::capability::{LlmCapabilities, DEFAULT_CONTEXT_WINDOW_TOKENS};
use sc_domain::config::{LlmConfig, ProviderKind, RetryConfig};
use sc_domain::error::{Error, Result};

use crate::auth::Credentials;
use crate::retry::{RetryPolicy, RetryingProvider};
use crate::scripted::ScriptedProvider;
use crate::traits::LlmProvider;

/// Instantiate the configured backend, wrapped in the retry layer.
pub fn build_provider(
    llm: &LlmConfig,
    retry: &RetryConfig,
    _credentials: &Credentials,
) -> Result<Arc<dyn LlmProvider>> {
    let capabilities = LlmCapabilities {
        supports_tools: true,
        supports_streaming: true,
        context_window_tokens: Some(
            llm.context_window_tokens
                .unwrap_or(DEFAULT_CONTEXT_WINDOW_TOKENS),
        ),
        max_output_tokens: llm.max_output_tokens,
    };

    let base: Arc<dyn LlmProvider> = match llm.provider {
        ProviderKind::Scripted => {
            let path = llm.script_path.as_deref().ok_or_else(|| {
                Error::Config("llm.script_path is required for the scripted provider".into())
            })?;
            Arc::new(ScriptedProvider::from_file(path)?.with_capabilities(capabilities))
        }
    };

    tracing::info!(
        provider_id = %base.provider_id(),
        kind = ?llm.provider,
        model = %llm.model,
        "registered LLM provider"
    );
    Ok(Arc::new(RetryingProvider::new(base, RetryPolicy::from(retry))))
}
