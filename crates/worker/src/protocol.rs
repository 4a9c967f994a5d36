//! Parent/worker message protocol: one JSON object per line over the
//! worker's stdin/stdout.
//!
//! ```text
//! worker → parent   {"type":"ready"}
//! parent → worker   {"type":"run","config":{...}}
//! worker → parent   {"type":"result","result":{...}}
//! ```
//!
//! The worker sends exactly one `result`. Anything on stdout that is not a
//! JSON object is skipped, so stray prints cannot break the channel.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use sc_domain::error::{Error, Result};

use crate::agents::AgentSource;
use crate::git::DiffContext;

/// Non-JSON lines tolerated before the channel is declared broken.
const MAX_SKIP_LINES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Run { config: WorkerRunConfig },
    Result { result: WorkerResult },
}

/// What the worker is asked to do with the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Fix problems by editing the worktree; the patch is the outcome.
    #[default]
    Check,
    /// Report findings without editing anything.
    Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOptions {
    #[serde(default)]
    pub kind: WorkerKind,
    /// Config file the worker loads, so it sees the parent's settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    pub max_diff_chars: usize,
}

/// Everything a worker needs for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRunConfig {
    pub agent: AgentSource,
    pub worktree_path: PathBuf,
    /// Commit the patch is taken against.
    pub baseline: String,
    pub diff_context: DiffContext,
    pub options: WorkerOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub agent_name: String,
    #[serde(default)]
    pub patch: String,
    #[serde(default)]
    pub agent_output: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pass,
    Fail,
    Error,
}

impl WorkerResult {
    pub fn failed(agent_name: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            agent_name: agent_name.into(),
            duration_ms,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// `error` when the worker failed, `fail` when it produced a patch,
    /// `pass` otherwise.
    pub fn status(&self) -> TaskStatus {
        if self.error.is_some() {
            TaskStatus::Error
        } else if !self.patch.trim().is_empty() {
            TaskStatus::Fail
        } else {
            TaskStatus::Pass
        }
    }
}

pub async fn write_message<W>(writer: &mut W, msg: &WorkerMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next message. `Ok(None)` means the peer closed the stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<WorkerMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|e| Error::Worker(format!("malformed worker message: {e}")));
        }
        skipped += 1;
        if skipped >= MAX_SKIP_LINES {
            return Err(Error::Worker("too many non-JSON lines on worker channel".into()));
        }
        tracing::debug!(line = %trimmed, "skipping non-JSON line on worker channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn wire_format_is_tagged() {
        let json = serde_json::to_value(&WorkerMessage::Ready).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ready"}));

        let result = WorkerMessage::Result {
            result: WorkerResult {
                agent_name: "a".into(),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["result"]["agent_name"], "a");
        assert!(json["result"].get("error").is_none());
    }

    #[test]
    fn status_follows_error_then_patch() {
        let mut r = WorkerResult::default();
        assert_eq!(r.status(), TaskStatus::Pass);
        r.patch = "diff --git a/x b/x\n".into();
        assert_eq!(r.status(), TaskStatus::Fail);
        r.error = Some("boom".into());
        assert_eq!(r.status(), TaskStatus::Error);
        r.patch = "  \n".into();
        r.error = None;
        assert_eq!(r.status(), TaskStatus::Pass);
    }

    #[tokio::test]
    async fn reader_skips_noise_and_reports_eof() {
        let input = b"warming up\n\n{\"type\":\"ready\"}\n" as &[u8];
        let mut reader = BufReader::new(input);
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(WorkerMessage::Ready));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_json_is_an_error() {
        let mut reader = BufReader::new(b"{\"type\":\"bogus\"}\n" as &[u8]);
        assert!(read_message(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn written_messages_read_back() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerMessage::Ready).await.unwrap();
        assert_eq!(buf, b"{\"type\":\"ready\"}\n");
    }
}
