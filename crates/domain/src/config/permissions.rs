use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool permissions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Operating mode. `Plan` and `Auto` replace the policy list outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    Normal,
    /// Read-only exploration: mutating tools are excluded.
    Plan,
    /// Everything allowed without asking.
    Auto,
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionMode::Normal => "normal",
            PermissionMode::Plan => "plan",
            PermissionMode::Auto => "auto",
        })
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(PermissionMode::Normal),
            "plan" => Ok(PermissionMode::Plan),
            "auto" => Ok(PermissionMode::Auto),
            other => Err(format!("unknown mode '{other}' (expected normal, plan or auto)")),
        }
    }
}

/// Personal permission settings from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub mode: PermissionMode,
    /// Include the built-in default policies after user entries.
    #[serde(default = "d_true")]
    pub use_defaults: bool,
    /// Persisted policy file (`allow`/`ask`/`exclude` lists). Defaults to
    /// `permissions.yaml` in the user config directory.
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub ask: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            mode: PermissionMode::Normal,
            use_defaults: true,
            policy_file: None,
            allow: Vec::new(),
            ask: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

fn d_true() -> bool {
    true
}
