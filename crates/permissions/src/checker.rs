//! First-match policy evaluation.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use sc_domain::error::{Error, Result};
use sc_domain::tool::{BuiltinTool, ToolCall};

use crate::pattern::{glob_matches, matches_tool_name, stringify_arg};
use crate::policy::{Permission, PermissionCheckResult, PermissionPolicy};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decide a tool call against an ordered policy list.
///
/// Scans in order; the first policy whose tool pattern matches and whose
/// argument globs all match wins. Falls through to `Ask`.
pub fn check_tool_permission(
    call: &ToolCall,
    policies: &[PermissionPolicy],
) -> PermissionCheckResult {
    for policy in policies {
        if !matches_tool_name(&call.tool_name, &policy.tool_pattern) {
            continue;
        }
        let args_ok = match &policy.argument_matches {
            Some(globs) => matches_arguments(&call.arguments, globs),
            None => true,
        };
        if args_ok {
            return PermissionCheckResult {
                permission: policy.permission,
                matched_policy: Some(policy.clone()),
            };
        }
    }

    PermissionCheckResult {
        permission: Permission::Ask,
        matched_policy: None,
    }
}

/// True when every glob matches the stringified argument of the same key.
/// A glob for an argument the call does not carry never matches.
pub fn matches_arguments(arguments: &Value, globs: &BTreeMap<String, String>) -> bool {
    globs.iter().all(|(key, glob)| match arguments.get(key) {
        Some(value) => glob_matches(glob, &stringify_arg(value)),
        None => false,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command deny-list
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Regex deny-list applied to Bash commands after policy evaluation.
#[derive(Debug, Clone, Default)]
pub struct CommandGuard {
    denied: Vec<Regex>,
}

impl CommandGuard {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let denied = patterns
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    Error::Config(format!("invalid denied command pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { denied })
    }

    /// The first deny pattern matching `command`, if any.
    pub fn denied_by(&self, command: &str) -> Option<&str> {
        self.denied
            .iter()
            .find(|re| re.is_match(command))
            .map(|re| re.as_str())
    }

    /// Force `Exclude` for Bash calls whose command hits the deny-list.
    pub fn apply(&self, call: &ToolCall, result: PermissionCheckResult) -> PermissionCheckResult {
        if BuiltinTool::from_name(&call.tool_name) != Some(BuiltinTool::Bash) {
            return result;
        }
        let command = call
            .arguments
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match self.denied_by(command) {
            Some(pattern) => {
                tracing::warn!(command, pattern, "command matches deny-list");
                PermissionCheckResult {
                    permission: Permission::Exclude,
                    matched_policy: Some(
                        PermissionPolicy::new("Bash", Permission::Exclude)
                            .with_argument("command", format!("/{pattern}/")),
                    ),
                }
            }
            None => result,
        }
    }
}
