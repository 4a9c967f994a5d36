//! The permission state a turn runs under.

use std::sync::Arc;

use sc_domain::config::PermissionMode;
use sc_domain::tool::{ToolCall, ToolDefinition};

use crate::checker::{check_tool_permission, CommandGuard};
use crate::defaults::mode_policies;
use crate::pattern::escape_glob;
use crate::policy::{Permission, PermissionCheckResult, PermissionPolicy};

/// Immutable snapshot of the active mode and policy list.
///
/// Mode switches and policy reloads build a new context instead of
/// mutating this one, so a loop iteration that already holds a context
/// never sees a half-updated list. The normal-mode list is carried along
/// while a mode is active so switching back restores it.
#[derive(Debug, Clone)]
pub struct PermissionContext {
    mode: PermissionMode,
    policies: Arc<Vec<PermissionPolicy>>,
    normal_policies: Arc<Vec<PermissionPolicy>>,
    guard: Arc<CommandGuard>,
}

impl PermissionContext {
    pub fn new(
        mode: PermissionMode,
        normal_policies: Vec<PermissionPolicy>,
        guard: CommandGuard,
    ) -> Self {
        let normal_policies = Arc::new(normal_policies);
        Self {
            mode,
            policies: Self::active_for(mode, &normal_policies),
            normal_policies,
            guard: Arc::new(guard),
        }
    }

    fn active_for(
        mode: PermissionMode,
        normal: &Arc<Vec<PermissionPolicy>>,
    ) -> Arc<Vec<PermissionPolicy>> {
        match mode_policies(mode) {
            Some(list) => Arc::new(list),
            None => Arc::clone(normal),
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// The list checks run against.
    pub fn policies(&self) -> &[PermissionPolicy] {
        &self.policies
    }

    /// The resolved user/default list, regardless of mode.
    pub fn normal_policies(&self) -> &[PermissionPolicy] {
        &self.normal_policies
    }

    /// Same normal-mode list under a different mode.
    pub fn with_mode(&self, mode: PermissionMode) -> Self {
        tracing::info!(from = %self.mode, to = %mode, "permission mode changed");
        Self {
            mode,
            policies: Self::active_for(mode, &self.normal_policies),
            normal_policies: Arc::clone(&self.normal_policies),
            guard: Arc::clone(&self.guard),
        }
    }

    /// Same mode with a freshly resolved normal-mode list.
    pub fn with_normal_policies(&self, normal_policies: Vec<PermissionPolicy>) -> Self {
        let normal_policies = Arc::new(normal_policies);
        Self {
            mode: self.mode,
            policies: Self::active_for(self.mode, &normal_policies),
            normal_policies,
            guard: Arc::clone(&self.guard),
        }
    }

    pub fn check(&self, call: &ToolCall) -> PermissionCheckResult {
        let result = check_tool_permission(call, &self.policies);
        self.guard.apply(call, result)
    }

    /// A tool is hidden from the model only when an argument-free policy
    /// excludes it; argument-specific excludes are decided per call.
    pub fn is_tool_excluded(&self, tool_name: &str) -> bool {
        let bare = ToolCall {
            call_id: String::new(),
            tool_name: tool_name.to_owned(),
            arguments: serde_json::Value::Object(Default::default()),
        };
        let result = check_tool_permission(&bare, &self.policies);
        result.permission == Permission::Exclude
            && result
                .matched_policy
                .as_ref()
                .map_or(false, PermissionPolicy::is_unconditional)
    }

    /// The toolset offered to the model under this context.
    pub fn filter_tools(&self, tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
        tools
            .iter()
            .filter(|t| !self.is_tool_excluded(&t.name))
            .cloned()
            .collect()
    }
}

/// Human-readable call label for approval prompts, e.g. `Bash(ls -la)`.
pub fn display_name(call: &ToolCall) -> String {
    let key = sc_domain::tool::default_arg_key(&call.tool_name);
    match call.arguments.get(key).and_then(|v| v.as_str()) {
        Some(arg) if !arg.is_empty() => format!("{}({})", call.tool_name, arg),
        _ => call.tool_name.clone(),
    }
}

/// Pattern persisted when the user picks "always allow".
///
/// Bash approvals are scoped to the exact command, with glob and
/// parenthesis characters escaped so the rule matches nothing else; every
/// other tool is allowed outright.
pub fn approval_pattern(call: &ToolCall) -> String {
    if call.tool_name != sc_domain::tool::BuiltinTool::Bash.name() {
        return call.tool_name.clone();
    }
    let key = sc_domain::tool::default_arg_key(&call.tool_name);
    match call.arguments.get(key).and_then(|v| v.as_str()) {
        Some(command) if !command.trim().is_empty() => {
            format!("{}({})", call.tool_name, escape_glob(command))
        }
        _ => call.tool_name.clone(),
    }
}
