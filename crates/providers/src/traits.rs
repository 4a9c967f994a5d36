use tokio_util::sync::CancellationToken;
use sc_domain::capability::LlmCapabilities;
use sc_domain::error::Result;
use sc_domain::stream::{BoxStream, Fragment, Usage};
use sc_domain::tool::{ChatHistoryItem, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation items, already windowed for the model.
    pub messages: Vec<ChatHistoryItem>,
    /// Tool definitions the model may invoke. Empty means no tools.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM backend implements.
///
/// The stream yields fragments in arrival order. Implementations stop
/// yielding once `cancel` is set.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream_completion(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<Fragment>>>;

    /// The advertised capabilities of this provider/model combination.
    fn capabilities(&self) -> &LlmCapabilities;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Text and usage of a fully drained completion.
#[derive(Debug, Clone, Default)]
pub struct CollectedText {
    pub content: String,
    pub usage: Option<Usage>,
}

/// Drain a completion, keeping only text and usage. Tool-call deltas are
/// dropped; callers use this for tool-less requests such as summaries.
pub async fn collect_text(
    provider: &dyn LlmProvider,
    req: ChatRequest,
    cancel: CancellationToken,
) -> Result<CollectedText> {
    use futures_util::StreamExt;

    let mut stream = provider.stream_completion(req, cancel).await?;
    let mut out = CollectedText::default();
    while let Some(fragment) = stream.next().await {
        match fragment? {
            Fragment::ContentDelta { text } => out.content.push_str(&text),
            Fragment::Usage(usage) => out.usage = Some(usage),
            Fragment::ToolCallDelta(_) => {}
        }
    }
    Ok(out)
}
