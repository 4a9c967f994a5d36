//! Built-in policy tables.

use sc_domain::config::PermissionMode;
use sc_domain::tool::BuiltinTool;

use crate::policy::{Permission, PermissionPolicy};

fn entry(tool: BuiltinTool, permission: Permission) -> PermissionPolicy {
    PermissionPolicy::new(tool.name(), permission)
}

/// Normal-mode defaults: reads are free, writes and shell commands ask.
/// The implicit trailing `*: ask` covers everything else.
pub fn default_policies() -> Vec<PermissionPolicy> {
    vec![
        entry(BuiltinTool::Read, Permission::Allow),
        entry(BuiltinTool::List, Permission::Allow),
        entry(BuiltinTool::Search, Permission::Allow),
        entry(BuiltinTool::JobOutput, Permission::Allow),
        entry(BuiltinTool::Write, Permission::Ask),
        entry(BuiltinTool::Edit, Permission::Ask),
        entry(BuiltinTool::Bash, Permission::Ask),
        entry(BuiltinTool::JobCancel, Permission::Ask),
    ]
}

/// Plan mode: mutating tools are excluded, everything else runs.
pub fn plan_mode_policies() -> Vec<PermissionPolicy> {
    let mut policies: Vec<PermissionPolicy> = BuiltinTool::ALL
        .into_iter()
        .filter(|t| t.is_mutating())
        .map(|t| entry(t, Permission::Exclude))
        .collect();
    policies.extend(
        BuiltinTool::ALL
            .into_iter()
            .filter(|t| !t.is_mutating())
            .map(|t| entry(t, Permission::Allow)),
    );
    policies.push(PermissionPolicy::new("*", Permission::Allow));
    policies
}

pub fn auto_mode_policies() -> Vec<PermissionPolicy> {
    vec![PermissionPolicy::new("*", Permission::Allow)]
}

/// Regex sources for [`CommandGuard`](crate::CommandGuard) that keep a
/// shell read-only: redirection into files and the common file-mutating
/// commands. Redirects on a numbered descriptor (`2>/dev/null`, `2>&1`)
/// stay allowed.
pub fn read_only_command_patterns() -> Vec<String> {
    vec![
        r"(^|[^0-9&>])>>?\s*[^&\s]".into(),
        r"\btee\b".into(),
        r"(^|[\s;&|(])(rm|mv|cp|touch|mkdir|rmdir|chmod|chown|truncate|ln|install)\s".into(),
        r"\b(sed|perl)\b[^|;&]*\s-[a-zA-Z]*i".into(),
        r"\bgit\s+(add|am|apply|checkout|clean|commit|merge|mv|rebase|reset|restore|rm|stash|switch)\b".into(),
    ]
}

/// The list a mode imposes, or `None` for `Normal` (which uses the
/// resolved user/default list).
pub fn mode_policies(mode: PermissionMode) -> Option<Vec<PermissionPolicy>> {
    match mode {
        PermissionMode::Normal => None,
        PermissionMode::Plan => Some(plan_mode_policies()),
        PermissionMode::Auto => Some(auto_mode_policies()),
    }
}
