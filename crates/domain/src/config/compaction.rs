use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses old conversation history into a summary so the
/// context window doesn't overflow during long sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Compact automatically when projected usage crosses the threshold.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Share of the input budget (window minus output reservation) kept
    /// free as headroom before compacting.
    #[serde(default = "d_buffer_ratio")]
    pub buffer_ratio: f64,
    /// Upper bound on the headroom, in tokens.
    #[serde(default = "d_buffer_cap")]
    pub buffer_cap_tokens: u32,
    /// Number of recent user turns kept verbatim after compaction.
    #[serde(default = "d_1")]
    pub keep_last_turns: usize,
    /// Longest line included in the summarization transcript.
    #[serde(default = "d_2000")]
    pub max_line_chars: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            buffer_ratio: 0.2,
            buffer_cap_tokens: 15_000,
            keep_last_turns: 1,
            max_line_chars: 2000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_buffer_ratio() -> f64 {
    0.2
}
fn d_buffer_cap() -> u32 {
    15_000
}
fn d_1() -> usize {
    1
}
fn d_2000() -> usize {
    2000
}
