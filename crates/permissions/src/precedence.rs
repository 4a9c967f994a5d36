//! Merging policy sources into one ordered list.

use sc_domain::error::Result;

use crate::pattern::policy_from_pattern;
use crate::policy::{Permission, PermissionPolicy};

/// Order policy sources so earlier entries win ties.
///
/// Command-line/runtime overrides come first, then personal settings, then
/// the defaults table (skipped entirely when `use_defaults` is false).
pub fn resolve_precedence(
    defaults: &[PermissionPolicy],
    command_line_overrides: &[PermissionPolicy],
    personal_settings: &[PermissionPolicy],
    use_defaults: bool,
) -> Vec<PermissionPolicy> {
    let mut policies = Vec::with_capacity(
        command_line_overrides.len() + personal_settings.len() + defaults.len(),
    );
    policies.extend_from_slice(command_line_overrides);
    policies.extend_from_slice(personal_settings);
    if use_defaults {
        policies.extend_from_slice(defaults);
    }
    policies
}

/// Convert `allow`/`ask`/`exclude` pattern lists into policies.
///
/// Output order is always exclude, then ask, then allow; order within each
/// category is preserved. Any malformed pattern fails the whole conversion.
pub fn policies_from_lists(
    allow: &[String],
    ask: &[String],
    exclude: &[String],
) -> Result<Vec<PermissionPolicy>> {
    let mut policies = Vec::with_capacity(allow.len() + ask.len() + exclude.len());
    for (patterns, permission) in [
        (exclude, Permission::Exclude),
        (ask, Permission::Ask),
        (allow, Permission::Allow),
    ] {
        for pattern in patterns {
            policies.push(policy_from_pattern(pattern, permission)?);
        }
    }
    Ok(policies)
}
