//! Bash tool: run a shell command in the foreground, detaching it into a
//! background job when it outlives `yield_ms`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use tokio_util::sync::CancellationToken;
use sc_domain::config::OutputConfig;

use crate::jobs::{JobManager, JobStatus};
use crate::truncate::truncate_output_from_start;

/// Lines of output shown when a command is detached.
const DETACHED_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct BashRequest {
    pub command: String,
    /// Start as a background job and return its id immediately.
    #[serde(default)]
    pub background: bool,
    /// Hard timeout override (seconds).
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

/// Run a command. Foreground commands that finish within `yield_ms` return
/// their output; slower ones keep running as a job whose id is returned.
/// Cancelling the turn cancels the job.
pub async fn bash(
    manager: &JobManager,
    workspace_root: &Path,
    req: BashRequest,
    output: &OutputConfig,
    cancel: &CancellationToken,
) -> Result<Value, String> {
    if req.command.trim().is_empty() {
        return Err("command must not be empty".into());
    }

    let id = manager.start_with_timeout(&req.command, Some(workspace_root), req.timeout_sec);

    if req.background {
        return Ok(serde_json::json!({
            "status": "running",
            "job_id": id,
            "message": "Started in the background. Use JobOutput with this job_id to check on it.",
        }));
    }

    let yield_ms = manager.config().yield_ms;
    let wait_for = if yield_ms == 0 {
        Duration::from_secs(req.timeout_sec.unwrap_or(manager.config().timeout_sec))
    } else {
        Duration::from_millis(yield_ms)
    };

    let snapshot = tokio::select! {
        snap = manager.wait(&id, wait_for) => snap,
        _ = cancel.cancelled() => {
            manager.cancel(&id);
            return Err("Command interrupted".into());
        }
    };
    let snapshot = snapshot.ok_or_else(|| format!("job {id} disappeared"))?;

    if !snapshot.status.is_terminal() {
        tracing::info!(job_id = %id, "command detached into background job");
        let tail: Vec<&str> = snapshot.output.lines().collect();
        let start = tail.len().saturating_sub(DETACHED_TAIL_LINES);
        return Ok(serde_json::json!({
            "status": "running",
            "job_id": id,
            "tail": tail[start..].join("\n"),
            "message": format!(
                "Still running after {} ms; continuing in the background. Use JobOutput with this job_id to check on it.",
                wait_for.as_millis()
            ),
        }));
    }

    manager.remove(&id);
    let text = truncate_output_from_start(&snapshot.output, output.max_lines, output.max_chars).output;
    match snapshot.status {
        JobStatus::Completed => Ok(serde_json::json!({
            "status": "completed",
            "exit_code": snapshot.exit_code,
            "output": text,
        })),
        _ => Err(format!(
            "{}\n{}",
            snapshot.error.unwrap_or_else(|| "command failed".into()),
            text
        )
        .trim_end()
        .to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_domain::config::ExecConfig;

    fn req(command: &str) -> BashRequest {
        BashRequest {
            command: command.into(),
            background: false,
            timeout_sec: None,
        }
    }

    #[tokio::test]
    async fn foreground_command_returns_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let m = JobManager::new(ExecConfig::default());
        let out = bash(&m, dir.path(), req("echo hi; exit 2"), &OutputConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out["status"], "completed");
        assert_eq!(out["exit_code"], 2);
        assert_eq!(out["output"].as_str().unwrap().trim(), "hi");
        assert!(m.list().is_empty(), "finished foreground jobs are forgotten");
    }

    #[tokio::test]
    async fn slow_command_is_detached() {
        let dir = tempfile::tempdir().unwrap();
        let m = JobManager::new(ExecConfig {
            yield_ms: 100,
            ..ExecConfig::default()
        });
        let out = bash(&m, dir.path(), req("echo begin; sleep 30"), &OutputConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out["status"], "running");
        let id = out["job_id"].as_str().unwrap();
        assert!(m.poll(id).is_some());
        assert!(m.cancel(id));
    }

    #[tokio::test]
    async fn background_flag_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let m = JobManager::new(ExecConfig::default());
        let out = bash(
            &m,
            dir.path(),
            BashRequest {
                background: true,
                ..req("sleep 30")
            },
            &OutputConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out["status"], "running");
        m.cancel_all();
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let m = JobManager::new(ExecConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = bash(&m, dir.path(), req("sleep 30"), &OutputConfig::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, "Command interrupted");
    }

    #[tokio::test]
    async fn cancelling_the_turn_reaches_child_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let m = JobManager::new(ExecConfig::default());
        let turn = CancellationToken::new();
        let call = turn.child_token();
        let trigger = turn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = bash(&m, dir.path(), req("sleep 30"), &OutputConfig::default(), &call)
            .await
            .unwrap_err();
        assert_eq!(err, "Command interrupted");
        assert!(call.is_cancelled());
    }

    #[tokio::test]
    async fn output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let m = JobManager::new(ExecConfig::default());
        let limits = OutputConfig {
            max_lines: 5,
            max_chars: 10_000,
        };
        let out = bash(&m, dir.path(), req("seq 1 20"), &limits, &CancellationToken::new())
            .await
            .unwrap();
        let text = out["output"].as_str().unwrap();
        assert!(text.starts_with("(previous 16 lines truncated)"));
        assert!(text.ends_with("20\n"));
    }
}
