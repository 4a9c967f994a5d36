//! Agent runtime: the tool-calling loop and everything it leans on.
//!
//! - `turn`: one user turn, from request through tool calls to the answer
//! - `assemble`: tool-call reassembly from streamed deltas
//! - `approval`: parked "ask" decisions waiting for the user
//! - `compact`: history summarization and the request window
//! - `tokens`: token estimates
//! - `tools`: tool definitions and dispatch

pub mod approval;
pub mod assemble;
pub mod compact;
pub mod tokens;
pub mod tools;
pub mod turn;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use tokio_util::sync::CancellationToken;
use sc_domain::config::{Config, PermissionMode};
use sc_domain::error::{Error, Result};
use sc_domain::stream::Usage;
use sc_domain::tool::ChatHistoryItem;
use sc_permissions::PermissionContext;
use sc_services::ServiceContainer;

use crate::services::{self, ApiClient, API_CLIENT, CONFIG, TOOL_PERMISSIONS};

pub use approval::{ApprovalDecision, ApprovalStore};
pub use turn::{drive_turn, run_turn, TurnHandle, TurnOutcome};

const DEFAULT_SYSTEM_PROMPT: &str = "You are SerialCode, a coding agent working in the user's \
repository. Use the tools to inspect files before changing them, keep edits minimal and \
focused, and run the project's checks when you change code. When a tool call is rejected, \
do not retry it; explain what you would have done instead. Answer concisely.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during a single agent turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    /// Incremental text from the assistant.
    #[serde(rename = "assistant_delta")]
    AssistantDelta { text: String },

    /// The model is invoking a tool.
    #[serde(rename = "tool_call")]
    ToolCallEvent {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// A call needs the user's answer before it can run.
    #[serde(rename = "approval_requested")]
    ApprovalRequested {
        approval_id: Uuid,
        call_id: String,
        tool_name: String,
        display: String,
        pattern: String,
    },

    /// Tool execution result (or the reason it did not run).
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// Older history was summarized.
    #[serde(rename = "compacted")]
    Compacted {
        tokens_before: u32,
        tokens_after: u32,
        items_compacted: usize,
    },

    /// The final assistant message (full text).
    #[serde(rename = "final")]
    Final { content: String },

    /// The turn was stopped by a cancellation request.
    #[serde(rename = "stopped")]
    Stopped {
        /// Partial content accumulated before the stop.
        content: String,
    },

    /// An error occurred.
    #[serde(rename = "error")]
    Error { message: String },

    /// Token usage for the turn.
    #[serde(rename = "usage")]
    UsageEvent {
        input_tokens: u32,
        output_tokens: u32,
        total_tokens: u32,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Conversation state carried across turns.
#[derive(Debug, Clone, Default)]
pub struct AgentSession {
    pub history: Vec<ChatHistoryItem>,
    /// Index of the active compaction marker in `history`.
    pub compaction_index: Option<usize>,
    /// The last turn was cancelled; an empty next message resumes it.
    pub interrupted: bool,
    /// Cumulative usage over the session.
    pub usage: Usage,
}

impl AgentSession {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            history: vec![ChatHistoryItem::system(system_prompt)],
            ..Default::default()
        }
    }

    pub fn add_usage(&mut self, usage: &Usage) {
        self.usage.prompt_tokens += usage.prompt_tokens;
        self.usage.completion_tokens += usage.completion_tokens;
        self.usage.total_tokens += usage.total_tokens;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared handles a turn runs against. Cheap to clone behind an `Arc`.
pub struct Runtime {
    services: Arc<ServiceContainer>,
    approvals: Arc<ApprovalStore>,
}

impl Runtime {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self {
            services,
            approvals: Arc::new(ApprovalStore::new()),
        }
    }

    pub fn services(&self) -> &Arc<ServiceContainer> {
        &self.services
    }

    pub fn approvals(&self) -> &Arc<ApprovalStore> {
        &self.approvals
    }

    pub async fn config(&self) -> Result<Arc<Config>> {
        self.services.get_typed::<Config>(CONFIG).await
    }

    /// A fresh session whose system prompt names the workspace.
    pub async fn new_session(&self) -> Result<AgentSession> {
        let config = self.config().await?;
        let root = workspace_root(&config)?;
        let base = config
            .agent
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        Ok(AgentSession::new(format!(
            "{base}\n\nWorkspace root: {}",
            root.display()
        )))
    }

    pub async fn mode(&self) -> Result<PermissionMode> {
        Ok(self
            .services
            .get_typed::<PermissionContext>(TOOL_PERMISSIONS)
            .await?
            .mode())
    }

    pub async fn set_mode(&self, mode: PermissionMode) -> Result<()> {
        services::set_mode(&self.services, mode).await
    }

    /// Summarize the session's history now, regardless of the threshold.
    pub async fn compact(
        &self,
        session: &mut AgentSession,
        cancel: CancellationToken,
    ) -> Result<Option<compact::CompactionOutcome>> {
        let config = self.config().await?;
        let client = self.services.get_typed::<ApiClient>(API_CLIENT).await?;
        let outcome = compact::compact_history(
            client.provider().as_ref(),
            &mut session.history,
            session.compaction_index,
            &config.compaction,
            cancel,
        )
        .await?;
        if let Some(o) = &outcome {
            session.compaction_index = Some(o.index);
        }
        Ok(outcome)
    }
}

/// The directory tools are confined to: the configured root (relative
/// paths resolved against the current directory) or the current directory.
pub fn workspace_root(config: &Config) -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| Error::Config(format!("cannot determine current directory: {e}")))?;
    Ok(match &config.agent.workspace_root {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => cwd.join(p),
        None => cwd,
    })
}
