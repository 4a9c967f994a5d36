//! Scripted provider: replays recorded responses, one step per request.
//!
//! Script file format (JSON):
//!
//! ```json
//! [
//!   { "fragments": [ { "type": "content_delta", "text": "Looking..." },
//!                    { "type": "tool_call_delta", "index": 0, "id": "c1",
//!                      "name": "Read", "args_delta": "{\"file_path\":\"a.rs\"}" } ] },
//!   { "error": { "message": "overloaded", "status": 529 } },
//!   { "fragments": [ { "type": "content_delta", "text": "Done." } ] }
//! ]
//! ```
//!
//! A step's `error` is yielded after its fragments, so a step with only an
//! error fails before any output.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tokio_util::sync::CancellationToken;
use sc_domain::capability::LlmCapabilities;
use sc_domain::error::{Error, Result};
use sc_domain::stream::{BoxStream, Fragment};

use crate::traits::{ChatRequest, LlmProvider};

const PROVIDER_ID: &str = "scripted";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ScriptError>,
    /// Pause before each fragment, for exercising cancellation.
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptError {
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
}

impl ScriptStep {
    pub fn reply(fragments: Vec<Fragment>) -> Self {
        Self {
            fragments,
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::reply(vec![Fragment::content(text)])
    }

    pub fn failure(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            error: Some(ScriptError {
                message: message.into(),
                status,
                retry_after_ms: None,
            }),
            ..Default::default()
        }
    }
}

impl ScriptError {
    fn to_error(&self) -> Error {
        Error::Provider {
            provider: PROVIDER_ID.into(),
            message: self.message.clone(),
            status: self.status,
            retry_after: self.retry_after_ms.map(Duration::from_millis),
        }
    }
}

pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<ChatRequest>>,
    capabilities: LlmCapabilities,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            capabilities: LlmCapabilities::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read script {}: {e}", path.display()))
        })?;
        let steps: Vec<ScriptStep> = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), steps = steps.len(), "loaded provider script");
        Ok(Self::new(steps))
    }

    pub fn with_capabilities(mut self, capabilities: LlmCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn stream_completion(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<Fragment>>> {
        self.requests.lock().push(req);
        let step = self
            .steps
            .lock()
            .pop_front()
            .ok_or_else(|| Error::provider(PROVIDER_ID, "script exhausted"))?;

        if step.fragments.is_empty() {
            if let Some(err) = &step.error {
                return Err(err.to_error());
            }
        }

        Ok(Box::pin(async_stream::stream! {
            for fragment in step.fragments {
                if step.delay_ms > 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(step.delay_ms)) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }
                yield Ok(fragment);
            }
            if let Some(err) = step.error {
                yield Err(err.to_error());
            }
        }))
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }
}
