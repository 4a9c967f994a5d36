//! History compaction: collapses older conversation into a summary so the
//! context window stays healthy over long sessions.
//!
//! Compaction never deletes history. It inserts a marker item (an assistant
//! message carrying the summary) at the cut point and records its index;
//! requests then send the system prompt, the marker and everything after it.
//! When a single turn outgrows the window, the cut lands before its latest
//! tool iteration and the turn's user message is repeated after the marker.

use tokio_util::sync::CancellationToken;
use sc_domain::capability::ModelInfo;
use sc_domain::config::CompactionConfig;
use sc_domain::error::{Error, Result};
use sc_domain::tool::{ChatHistoryItem, Role};
use sc_providers::{collect_text, ChatRequest, LlmProvider};

/// Summary requests reserve this many output tokens.
const SUMMARY_MAX_TOKENS: u32 = 2000;

/// What a compaction did, for events and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionOutcome {
    /// Index of the inserted marker.
    pub index: usize,
    pub summary: String,
    pub items_compacted: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thresholds and windows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token count above which a request triggers compaction.
///
/// The input budget is the context window minus the output reservation.
/// A buffer of `buffer_ratio` of that budget (at least the output
/// reservation, at most `buffer_cap_tokens`) is kept free below it.
pub fn compaction_threshold(model: &ModelInfo, cfg: &CompactionConfig) -> Result<u32> {
    let context = i64::from(model.context_window_tokens);
    let max_output = i64::from(model.reserved_output_tokens());
    let input_budget = context - max_output;
    let ratio_buffer = (cfg.buffer_ratio * input_budget.max(0) as f64).ceil() as i64;
    let buffer = ratio_buffer
        .max(max_output)
        .min(i64::from(cfg.buffer_cap_tokens));
    let threshold = input_budget - buffer;
    if threshold <= 0 {
        return Err(Error::Config(format!(
            "context window of {context} tokens leaves no room for input \
             (output reservation {max_output}, compaction buffer {buffer})"
        )));
    }
    Ok(threshold as u32)
}

/// Index of the most recent compaction marker.
pub fn find_compaction_index(history: &[ChatHistoryItem]) -> Option<usize> {
    history.iter().rposition(ChatHistoryItem::is_compaction_marker)
}

/// The items a request sends: the system prompt (when the history starts
/// with one) followed by everything from the marker on. Without a valid
/// marker index the full history is sent.
pub fn get_history_for_llm(history: &[ChatHistoryItem], index: Option<usize>) -> Vec<ChatHistoryItem> {
    match index {
        Some(i) if i < history.len() => {
            let mut out = Vec::with_capacity(history.len() - i + 1);
            if i > 0 && history[0].role == Role::System {
                out.push(history[0].clone());
            }
            out.extend_from_slice(&history[i..]);
            out
        }
        _ => history.to_vec(),
    }
}

/// Where a compaction cuts history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionSplit {
    /// First summarized item: the previous marker, or the first item after
    /// the system prompt.
    pub start: usize,
    /// The marker is inserted here; items from `cut` on stay verbatim.
    pub cut: usize,
    /// Set when the cut falls inside the current turn: the index of that
    /// turn's user message, repeated right after the marker.
    pub carried_request: Option<usize>,
}

/// Range `[start, cut)` to summarize, keeping the last `keep_last_turns`
/// user turns (at least the current one) verbatim. When everything since
/// the last marker belongs to the current turn, the cut moves inside it,
/// before the latest assistant tool call, so older iterations of a long
/// tool loop are summarized. `None` when there is nothing new to summarize.
pub fn split_for_compaction(
    history: &[ChatHistoryItem],
    index: Option<usize>,
    keep_last_turns: usize,
) -> Option<CompactionSplit> {
    let start = match index {
        Some(i) if i < history.len() => i,
        _ => usize::from(history.first().map_or(false, |h| h.role == Role::System)),
    };
    let active = &history[start..];
    let keep = keep_last_turns.max(1);

    let mut users = 0;
    let mut keep_from = 0;
    let mut current_request = None;
    for (i, item) in active.iter().enumerate().rev() {
        if item.role == Role::User {
            current_request.get_or_insert(start + i);
            users += 1;
            if users >= keep {
                keep_from = i;
                break;
            }
        }
    }

    let cut = start + keep_from;
    if !history[start..cut].iter().all(ChatHistoryItem::is_compaction_marker) {
        return Some(CompactionSplit {
            start,
            cut,
            carried_request: None,
        });
    }

    // One turn holds everything new. Keep its latest call and results.
    let request = current_request?;
    let after = request + 1;
    let latest_call = after + history[after..].iter().rposition(|h| !h.tool_calls.is_empty())?;
    if latest_call == after {
        return None;
    }
    Some(CompactionSplit {
        start,
        cut: latest_call,
        carried_request: Some(request),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarizing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ask the model for a summary of `items`. The request carries no tools.
pub async fn generate_summary(
    provider: &dyn LlmProvider,
    items: &[ChatHistoryItem],
    max_line_chars: usize,
    cancel: CancellationToken,
) -> Result<String> {
    let conversation = build_conversation_text(items, max_line_chars);
    let prompt = format!(
        "Your task is to provide a concise summary of the coding session below so \
         the work can continue without the full transcript. Preserve:\n\
         1. The user's current goal and the plan being followed\n\
         2. Decisions made and their reasons\n\
         3. Files read or modified and what changed\n\
         4. Commands run and their outcome, including running background jobs\n\
         5. Open questions and next steps\n\n\
         Write in present tense. Omit pleasantries.\n\n\
         CONVERSATION:\n{conversation}"
    );

    let req = ChatRequest {
        messages: vec![ChatHistoryItem::user(prompt)],
        tools: Vec::new(),
        temperature: Some(0.1),
        max_tokens: Some(SUMMARY_MAX_TOKENS),
        model: None,
    };
    let collected = collect_text(provider, req, cancel).await?;
    let summary = collected.content.trim().to_owned();
    if summary.is_empty() {
        return Err(Error::provider(
            provider.provider_id(),
            "compaction produced an empty summary",
        ));
    }
    Ok(summary)
}

/// Summarize the compactable prefix of `history` and insert the marker.
///
/// Returns `None` (history untouched) when there is nothing new since the
/// last marker.
pub async fn compact_history(
    provider: &dyn LlmProvider,
    history: &mut Vec<ChatHistoryItem>,
    index: Option<usize>,
    cfg: &CompactionConfig,
    cancel: CancellationToken,
) -> Result<Option<CompactionOutcome>> {
    let Some(split) = split_for_compaction(history, index, cfg.keep_last_turns) else {
        tracing::debug!("nothing to compact");
        return Ok(None);
    };
    let CompactionSplit { start, cut, carried_request } = split;

    let summary = generate_summary(provider, &history[start..cut], cfg.max_line_chars, cancel).await?;
    history.insert(cut, ChatHistoryItem::compaction_marker(summary.clone()));
    if let Some(request) = carried_request {
        let repeated = history[request].clone();
        history.insert(cut + 1, repeated);
    }

    tracing::info!(
        items_compacted = cut - start,
        marker_index = cut,
        mid_turn = carried_request.is_some(),
        summary_len = summary.len(),
        "history compacted"
    );
    Ok(Some(CompactionOutcome {
        index: cut,
        summary,
        items_compacted: cut - start,
    }))
}

fn build_conversation_text(items: &[ChatHistoryItem], max_line_chars: usize) -> String {
    let mut buf = String::new();
    for item in items {
        let label = if item.is_compaction_marker() {
            "Summary of earlier conversation"
        } else {
            match item.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            }
        };
        buf.push_str(label);
        buf.push_str(": ");
        buf.push_str(&clip(&item.content, max_line_chars));
        buf.push('\n');
        for call in &item.tool_calls {
            buf.push_str(&format!(
                "Assistant called {}: {}\n",
                call.tool_name,
                clip(&call.arguments.to_string(), max_line_chars)
            ));
        }
    }
    buf
}

/// Keep the head and tail of long text, on char boundaries.
fn clip(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }
    let head = max_chars / 2;
    let tail = max_chars / 4;
    let head_str: String = text.chars().take(head).collect();
    let tail_str: String = text.chars().skip(total - tail).collect();
    format!("{head_str} [...] {tail_str}")
}
