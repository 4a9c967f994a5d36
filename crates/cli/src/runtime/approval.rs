//! Interactive tool approvals.
//!
//! When a call resolves to `ask`, the turn parks a oneshot sender here and
//! emits an approval event. The front-end answers through
//! [`ApprovalStore::resolve`]; the waiting turn wakes with the decision.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use sc_domain::tool::ToolCall;
use sc_permissions::context::{approval_pattern, display_name};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The user's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Run this call only.
    Once,
    /// Run it and persist an allow rule for the call's pattern.
    Always,
    Deny,
}

/// A pending approval waiting for the user.
pub struct PendingApproval {
    pub id: Uuid,
    pub call_id: String,
    pub tool_name: String,
    pub display: String,
    pub pattern: String,
    pub created_at: DateTime<Utc>,
    pub respond: oneshot::Sender<ApprovalDecision>,
}

/// Serializable snapshot of a pending approval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalInfo {
    pub id: Uuid,
    pub call_id: String,
    pub tool_name: String,
    /// Label for the prompt, e.g. `Bash(cargo test)`.
    pub display: String,
    /// Rule persisted if the user picks "always".
    pub pattern: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingApproval> for ApprovalInfo {
    fn from(p: &PendingApproval) -> Self {
        Self {
            id: p.id,
            call_id: p.call_id.clone(),
            tool_name: p.tool_name.clone(),
            display: p.display.clone(),
            pattern: p.pattern.clone(),
            created_at: p.created_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ApprovalStore {
    pending: RwLock<HashMap<Uuid, PendingApproval>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an approval for `call`. The receiver yields the decision.
    pub fn request(&self, call: &ToolCall) -> (ApprovalInfo, oneshot::Receiver<ApprovalDecision>) {
        let (tx, rx) = oneshot::channel();
        let pending = PendingApproval {
            id: Uuid::new_v4(),
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            display: display_name(call),
            pattern: approval_pattern(call),
            created_at: Utc::now(),
            respond: tx,
        };
        let info = ApprovalInfo::from(&pending);
        self.pending.write().insert(pending.id, pending);
        (info, rx)
    }

    /// Answer a pending approval. Returns `true` if it was found.
    pub fn resolve(&self, id: &Uuid, decision: ApprovalDecision) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(decision);
            return true;
        }
        false
    }

    /// Drop an approval nobody will answer (the turn was cancelled).
    pub fn discard(&self, id: &Uuid) {
        self.pending.write().remove(id);
    }

    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending.read().values().map(ApprovalInfo::from).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn bash(command: &str) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: "Bash".into(),
            arguments: serde_json::json!({ "command": command }),
        }
    }

    #[tokio::test]
    async fn resolve_wakes_the_waiter() {
        let store = ApprovalStore::new();
        let (info, rx) = store.request(&bash("ls -la"));
        assert_eq!(info.display, "Bash(ls -la)");
        assert_eq!(info.pattern, "Bash(ls -la)");
        assert_eq!(store.list_pending().len(), 1);

        assert!(store.resolve(&info.id, ApprovalDecision::Always));
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Always);
        assert!(store.list_pending().is_empty());
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = ApprovalStore::new();
        assert!(!store.resolve(&Uuid::new_v4(), ApprovalDecision::Deny));
    }

    #[tokio::test]
    async fn discard_drops_the_sender() {
        let store = ApprovalStore::new();
        let (info, rx) = store.request(&bash("make"));
        store.discard(&info.id);
        assert!(rx.await.is_err());
    }

    #[test]
    fn non_bash_pattern_is_the_tool_name() {
        let store = ApprovalStore::new();
        let call = ToolCall {
            call_id: "c2".into(),
            tool_name: "Write".into(),
            arguments: serde_json::json!({ "file_path": "src/lib.rs" }),
        };
        let (info, _rx) = store.request(&call);
        assert_eq!(info.display, "Write(src/lib.rs)");
        assert_eq!(info.pattern, "Write");
    }
}
