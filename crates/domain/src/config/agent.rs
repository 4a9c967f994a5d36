use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on model round-trips within one user turn.
    #[serde(default = "d_25")]
    pub max_tool_loops: usize,
    /// Replaces the built-in system prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Never prompt; `Ask` decisions become errors.
    #[serde(default)]
    pub headless: bool,
    /// Root directory the file and shell tools operate in. Defaults to the
    /// current directory.
    #[serde(default)]
    pub workspace_root: Option<std::path::PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_loops: 25,
            system_prompt: None,
            headless: false,
            workspace_root: None,
        }
    }
}

fn d_25() -> usize {
    25
}
