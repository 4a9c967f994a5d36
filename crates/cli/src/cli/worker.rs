//! The process side of `check`/`review`: `serialcode --internal-worker`.
//!
//! stdout carries the worker protocol, so all logging goes to stderr
//! (which the parent forwards at debug level).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::sync::mpsc;

use tokio_util::sync::CancellationToken;
use sc_domain::config::{Config, PermissionMode};
use sc_domain::error::{Error, Result};
use sc_permissions::defaults::read_only_command_patterns;
use sc_tools::JobManager;
use sc_worker::{AgentRunner, WorkerKind, WorkerRunConfig};

use crate::runtime::{drive_turn, Runtime, TurnEvent, TurnOutcome};
use crate::services::{build_services, ConfigSource, SessionOverrides, JOBS};

/// Runs the worker prompt through the regular agent loop, confined to the
/// task's worktree and never prompting.
pub struct RuntimeAgentRunner;

/// Check agents edit freely; review agents only look.
fn mode_for(kind: WorkerKind) -> PermissionMode {
    match kind {
        WorkerKind::Check => PermissionMode::Auto,
        WorkerKind::Review => PermissionMode::Plan,
    }
}

/// Plan mode still runs Bash, so review workers also get the read-only
/// command guard.
fn session_overrides(kind: WorkerKind, worktree: &Path) -> SessionOverrides {
    let denied_commands = match kind {
        WorkerKind::Check => Vec::new(),
        WorkerKind::Review => read_only_command_patterns(),
    };
    SessionOverrides {
        mode: Some(mode_for(kind)),
        headless: true,
        workspace_root: Some(worktree.to_path_buf()),
        denied_commands,
        ..Default::default()
    }
}

#[async_trait]
impl AgentRunner for RuntimeAgentRunner {
    async fn run(&self, config: &WorkerRunConfig, prompt: String) -> Result<String> {
        let source = match &config.options.config_path {
            Some(path) => ConfigSource::File(path.clone()),
            None => ConfigSource::Fixed(Config::default()),
        };
        let overrides = session_overrides(config.options.kind, &config.worktree_path);
        let services = build_services(source, overrides)?;
        let runtime = Runtime::new(Arc::clone(&services));
        let mut session = runtime.new_session().await?;

        let (tx, mut rx) = mpsc::channel::<TurnEvent>(64);
        let agent = config.agent.name.clone();
        let log_events = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    TurnEvent::ToolCallEvent { tool_name, .. } => {
                        tracing::info!(%agent, tool = %tool_name, "worker tool call");
                    }
                    TurnEvent::Compacted { items_compacted, .. } => {
                        tracing::info!(%agent, items_compacted, "worker history compacted");
                    }
                    _ => {}
                }
            }
        });

        let outcome = drive_turn(&runtime, &mut session, &prompt, &tx, &CancellationToken::new()).await;
        drop(tx);
        let _ = log_events.await;

        if let Ok(jobs) = services.get_typed::<JobManager>(JOBS).await {
            jobs.cancel_all();
        }

        match outcome? {
            TurnOutcome::Completed { content } => Ok(content),
            TurnOutcome::LoopLimit { content } => {
                tracing::warn!(agent = %config.agent.name, "worker hit the tool loop limit");
                Ok(content)
            }
            TurnOutcome::Interrupted { .. } => Err(Error::Cancelled),
        }
    }
}

/// Serve one task on stdin/stdout.
pub async fn run_internal_worker() -> anyhow::Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    sc_worker::serve(input, tokio::io::stdout(), &RuntimeAgentRunner).await?;
    Ok(())
}
