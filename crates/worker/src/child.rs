//! Worker side of the protocol.
//!
//! The process announces itself, receives one task, runs the agent inside
//! the task's worktree and reports the patch it produced.

use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWrite};

use sc_domain::error::{Error, Result};

use crate::prompt::build_worker_prompt;
use crate::protocol::{read_message, write_message, WorkerMessage, WorkerResult, WorkerRunConfig};
use crate::worktree::capture_patch;

/// Runs one agent loop for a task and returns the agent's final output.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, config: &WorkerRunConfig, prompt: String) -> Result<String>;
}

/// Serve a single task over `input`/`output`.
pub async fn serve<R, W>(mut input: R, mut output: W, runner: &dyn AgentRunner) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_message(&mut output, &WorkerMessage::Ready).await?;

    let config = match read_message(&mut input).await? {
        Some(WorkerMessage::Run { config }) => config,
        Some(other) => {
            return Err(Error::Worker(format!("expected a run message, got {other:?}")));
        }
        None => return Err(Error::Worker("parent closed the channel before sending a task".into())),
    };

    let result = run_task(&config, runner).await;
    write_message(&mut output, &WorkerMessage::Result { result }).await
}

async fn run_task(config: &WorkerRunConfig, runner: &dyn AgentRunner) -> WorkerResult {
    let started = Instant::now();
    let prompt = build_worker_prompt(
        config.options.kind,
        &config.agent,
        &config.diff_context,
        config.options.max_diff_chars,
    );

    tracing::info!(
        agent = %config.agent.name,
        worktree = %config.worktree_path.display(),
        kind = ?config.options.kind,
        "worker task started"
    );

    let (agent_output, mut error) = match runner.run(config, prompt).await {
        Ok(out) => (out, None),
        Err(e) => (String::new(), Some(e.to_string())),
    };

    let patch = match capture_patch(&config.worktree_path, &config.baseline).await {
        Ok(p) => p,
        Err(e) => {
            error.get_or_insert_with(|| e.to_string());
            String::new()
        }
    };

    let result = WorkerResult {
        agent_name: config.agent.name.clone(),
        patch,
        agent_output,
        duration_ms: started.elapsed().as_millis() as u64,
        error,
    };
    tracing::info!(
        agent = %result.agent_name,
        status = ?result.status(),
        duration_ms = result.duration_ms,
        "worker task finished"
    );
    result
}
