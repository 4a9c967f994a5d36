use serde::{Deserialize, Serialize};

/// Context window used when neither the provider nor the config declares one.
pub const DEFAULT_CONTEXT_WINDOW_TOKENS: u32 = 128_000;

/// Model capabilities advertised by a provider for its active model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for LlmCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_streaming: true,
            context_window_tokens: None,
            max_output_tokens: None,
        }
    }
}

/// The resolved model the agent loop talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub name: String,
    pub context_window_tokens: u32,
    /// Output tokens reserved per request. `None` lets the loop derive a
    /// reservation from the context window.
    pub max_output_tokens: Option<u32>,
}

impl ModelInfo {
    /// Output reservation: the declared value, or 35% of the window capped
    /// at 64k tokens.
    pub fn reserved_output_tokens(&self) -> u32 {
        match self.max_output_tokens {
            Some(n) => n,
            None => ((self.context_window_tokens as f64 * 0.35) as u32).min(64_000),
        }
    }
}
