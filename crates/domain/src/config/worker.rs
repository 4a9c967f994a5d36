use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Isolated workers (check / review)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Wall-clock limit per worker process.
    #[serde(default = "d_300")]
    pub timeout_sec: u64,
    /// Workers running at once.
    #[serde(default = "d_4")]
    pub max_concurrency: usize,
    /// Diff characters included in a worker prompt before truncation.
    #[serde(default = "d_50000")]
    pub max_diff_chars: usize,
    /// Directory scanned for agent definitions (`*.md`).
    #[serde(default = "d_agents_dir")]
    pub agents_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeout_sec: 300,
            max_concurrency: 4,
            max_diff_chars: 50_000,
            agents_dir: d_agents_dir(),
        }
    }
}

fn d_300() -> u64 {
    300
}
fn d_4() -> usize {
    4
}
fn d_50000() -> usize {
    50_000
}
fn d_agents_dir() -> PathBuf {
    PathBuf::from(".serialcode/agents")
}
