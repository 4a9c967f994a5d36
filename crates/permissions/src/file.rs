//! Persisted policy document.
//!
//! ```yaml
//! allow:
//!   - Read
//!   - Bash(git status*)
//! ask:
//!   - Write
//! exclude:
//!   - Bash(rm *)
//! ```
//!
//! Conversion to the ordered policy list always emits `exclude` entries
//! first, then `ask`, then `allow`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use sc_domain::error::Result;

use crate::policy::PermissionPolicy;
use crate::precedence::policies_from_lists;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ask: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl PolicyFile {
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from disk; a missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no policy file");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn to_policies(&self) -> Result<Vec<PermissionPolicy>> {
        policies_from_lists(&self.allow, &self.ask, &self.exclude)
    }

    /// Record an "always allow" approval. Returns false if already present.
    pub fn add_allow(&mut self, pattern: impl Into<String>) -> bool {
        let pattern = pattern.into();
        if self.allow.contains(&pattern) {
            return false;
        }
        self.allow.push(pattern);
        true
    }

    /// Write atomically: write to a uniquely-named sibling, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self)?;
        let tmp_name = format!(
            ".{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            uuid::Uuid::new_v4().as_simple()
        );
        let tmp_path = path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, yaml)?;
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        tracing::debug!(path = %path.display(), "policy file saved");
        Ok(())
    }
}
