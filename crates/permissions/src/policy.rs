use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Allow,
    Ask,
    Exclude,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::Allow => "allow",
            Permission::Ask => "ask",
            Permission::Exclude => "exclude",
        })
    }
}

/// One entry of the ordered policy list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    /// Tool name, `*`-wildcard pattern, or the bare name when the entry was
    /// parsed from `Name(argPattern)`.
    pub tool_pattern: String,
    pub permission: Permission,
    /// Argument globs that must all match (key = argument name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_matches: Option<BTreeMap<String, String>>,
}

impl PermissionPolicy {
    pub fn new(tool_pattern: impl Into<String>, permission: Permission) -> Self {
        Self {
            tool_pattern: tool_pattern.into(),
            permission,
            argument_matches: None,
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, glob: impl Into<String>) -> Self {
        self.argument_matches
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), glob.into());
        self
    }

    /// True when the policy constrains no argument.
    pub fn is_unconditional(&self) -> bool {
        self.argument_matches
            .as_ref()
            .map_or(true, |m| m.is_empty())
    }
}

impl fmt::Display for PermissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument_matches {
            Some(args) if args.len() == 1 => {
                let glob = args.values().next().map(String::as_str).unwrap_or_default();
                write!(f, "{}({}): {}", self.tool_pattern, glob, self.permission)
            }
            Some(args) if !args.is_empty() => {
                let parts: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{}[{}]: {}", self.tool_pattern, parts.join(","), self.permission)
            }
            _ => write!(f, "{}: {}", self.tool_pattern, self.permission),
        }
    }
}

/// Decision plus the policy that produced it (`None` for the implicit
/// trailing `*: ask`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheckResult {
    pub permission: Permission,
    pub matched_policy: Option<PermissionPolicy>,
}
