//! Character-based token estimates.
//!
//! No tokenizer is bundled; four characters per token plus fixed overheads
//! per message and per tool call is close enough to decide when to compact
//! and whether a request fits.

use sc_domain::tool::{ChatHistoryItem, ToolDefinition};

const CHARS_PER_TOKEN: usize = 4;
const MESSAGE_OVERHEAD: u32 = 2;
const TOOL_CALL_OVERHEAD: u32 = 10;
const TOOLS_BASE_OVERHEAD: u32 = 12;
const TOOL_DEFINITION_OVERHEAD: u32 = 12;

pub fn estimate_text(text: &str) -> u32 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u32
}

pub fn estimate_item(item: &ChatHistoryItem) -> u32 {
    let mut tokens = estimate_text(&item.content) + MESSAGE_OVERHEAD;
    for call in &item.tool_calls {
        tokens += TOOL_CALL_OVERHEAD
            + estimate_text(&call.tool_name)
            + estimate_text(&call.arguments.to_string());
    }
    for ctx in &item.context_items {
        tokens += estimate_text(&ctx.name) + estimate_text(&ctx.content);
    }
    tokens
}

pub fn estimate_history(items: &[ChatHistoryItem]) -> u32 {
    items.iter().map(estimate_item).sum()
}

/// Cost of sending `tools` with a request. No tools costs nothing.
pub fn estimate_tools(tools: &[ToolDefinition]) -> u32 {
    if tools.is_empty() {
        return 0;
    }
    TOOLS_BASE_OVERHEAD
        + tools
            .iter()
            .map(|t| {
                TOOL_DEFINITION_OVERHEAD
                    + estimate_text(&t.name)
                    + estimate_text(&t.description)
                    + estimate_text(&t.parameters.to_string())
            })
            .sum::<u32>()
}
