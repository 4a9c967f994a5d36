use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Extra material attached to a history item (file contents, rules, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub name: String,
    pub content: String,
}

/// One entry of the conversation.
///
/// An assistant item with `conversation_summary` set is a compaction marker:
/// it stands in for everything before it when the history is sent to the
/// model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryItem {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub context_items: Vec<ContextItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_summary: Option<String>,
}

/// Built-in tools known to the runtime.
///
/// Permission patterns such as `Write(src/**)` constrain one argument per
/// tool; [`BuiltinTool::default_arg_key`] says which. Tools outside this set
/// (MCP or plugin tools) use the generic `pattern` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    Read,
    Write,
    Edit,
    List,
    Search,
    Bash,
    JobOutput,
    JobCancel,
}

/// Argument key used for tools that are not built in.
pub const GENERIC_ARG_KEY: &str = "pattern";

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 8] = [
        BuiltinTool::Read,
        BuiltinTool::Write,
        BuiltinTool::Edit,
        BuiltinTool::List,
        BuiltinTool::Search,
        BuiltinTool::Bash,
        BuiltinTool::JobOutput,
        BuiltinTool::JobCancel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinTool::Read => "Read",
            BuiltinTool::Write => "Write",
            BuiltinTool::Edit => "Edit",
            BuiltinTool::List => "List",
            BuiltinTool::Search => "Search",
            BuiltinTool::Bash => "Bash",
            BuiltinTool::JobOutput => "JobOutput",
            BuiltinTool::JobCancel => "JobCancel",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn default_arg_key(self) -> &'static str {
        match self {
            BuiltinTool::Bash => "command",
            BuiltinTool::Read | BuiltinTool::Write | BuiltinTool::Edit => "file_path",
            BuiltinTool::List => "dirpath",
            BuiltinTool::Search => "pattern",
            BuiltinTool::JobOutput | BuiltinTool::JobCancel => "job_id",
        }
    }

    /// Whether the tool changes the workspace.
    pub fn is_mutating(self) -> bool {
        matches!(self, BuiltinTool::Write | BuiltinTool::Edit)
    }
}

/// Argument key constrained by `Name(argPattern)` for any tool name.
pub fn default_arg_key(tool_name: &str) -> &'static str {
    BuiltinTool::from_name(tool_name)
        .map(BuiltinTool::default_arg_key)
        .unwrap_or(GENERIC_ARG_KEY)
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatHistoryItem {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            context_items: Vec::new(),
            conversation_summary: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text.into())
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into())
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text.into())
    }
    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, text.into())
        }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content.into())
        }
    }

    /// Synthetic assistant message that replaces a summarized prefix.
    pub fn compaction_marker(summary: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            conversation_summary: Some(summary.clone()),
            ..Self::new(Role::Assistant, summary)
        }
    }

    pub fn is_compaction_marker(&self) -> bool {
        self.role == Role::Assistant && self.conversation_summary.is_some()
    }

    pub fn with_context_item(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.context_items.push(ContextItem {
            name: name.into(),
            content: content.into(),
        });
        self
    }
}
