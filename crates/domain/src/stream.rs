use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One incremental unit of a streamed model response (provider-agnostic).
///
/// Fragments may arrive in any grouping: a tool call's id and name can come
/// in the first delta for an index and its arguments spread over many later
/// ones. Consumers reassemble calls by `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
    /// A chunk of assistant text.
    ContentDelta { text: String },

    /// Partial tool-call data for the call at `index`.
    ToolCallDelta(ToolCallDelta),

    /// Terminal usage summary for the request.
    Usage(Usage),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub args_delta: String,
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Fragment {
    pub fn content(text: impl Into<String>) -> Self {
        Fragment::ContentDelta { text: text.into() }
    }

    pub fn tool_call(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        args_delta: impl Into<String>,
    ) -> Self {
        Fragment::ToolCallDelta(ToolCallDelta {
            index,
            id: id.map(str::to_owned),
            name: name.map(str::to_owned),
            args_delta: args_delta.into(),
        })
    }
}
