//! `serialcode run`: one-shot execution command.
//!
//! Sends a single message to the agent, streams the response to stdout,
//! and exits.  Useful for scripting and piping.

use std::io::Write;
use std::sync::Arc;

use sc_services::ServiceContainer;
use sc_tools::JobManager;
use tokio::sync::Mutex;

use crate::runtime::{run_turn, Runtime, TurnEvent, TurnHandle};
use crate::services::JOBS;

use super::prompt_approval;

/// Execute a single agent turn and print the response. Returns the exit
/// code: 1 when the turn reported an error.
pub async fn run(services: Arc<ServiceContainer>, message: String, json_output: bool) -> anyhow::Result<i32> {
    let runtime = Arc::new(Runtime::new(Arc::clone(&services)));
    let session = Arc::new(Mutex::new(runtime.new_session().await?));

    let handle = run_turn(Arc::clone(&runtime), session, message);
    let events = drain_turn(&runtime, handle, json_output).await;

    let exit_code = i32::from(events.iter().any(|e| matches!(e, TurnEvent::Error { .. })));
    if json_output {
        let json = serde_json::to_string_pretty(&events)
            .map_err(|e| anyhow::anyhow!("serializing events: {e}"))?;
        println!("{json}");
    }

    if let Ok(jobs) = services.get_typed::<JobManager>(JOBS).await {
        jobs.cancel_all();
    }
    Ok(exit_code)
}

/// Stream a turn's events until it ends, answering approval requests on
/// the terminal and cancelling on Ctrl+C. Returns every event seen.
pub(crate) async fn drain_turn(runtime: &Runtime, mut handle: TurnHandle, quiet: bool) -> Vec<TurnEvent> {
    let mut seen = Vec::new();
    loop {
        tokio::select! {
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                if let TurnEvent::ApprovalRequested { approval_id, display, pattern, .. } = &event {
                    let decision = prompt_approval(display, pattern).await;
                    if !runtime.approvals().resolve(approval_id, decision) {
                        tracing::warn!(%approval_id, "approval no longer pending");
                    }
                } else if !quiet {
                    print_event(&event);
                }
                seen.push(event);
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\x1b[2m(stopping…)\x1b[0m");
                handle.cancel.cancel();
            }
        }
    }

    if let Err(e) = handle.task.await {
        tracing::error!(error = %e, "turn task panicked");
    }
    seen
}

/// Plain-text rendering: assistant text on stdout, everything else dim on
/// stderr.
pub(crate) fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::AssistantDelta { text } => {
            print!("{text}");
            std::io::stdout().flush().ok();
        }
        TurnEvent::ToolCallEvent { tool_name, .. } => {
            eprintln!("\x1b[2m[tool: {tool_name}]\x1b[0m");
        }
        TurnEvent::ToolResult {
            tool_name,
            content,
            is_error: true,
            ..
        } => {
            let first = content.lines().next().unwrap_or_default();
            eprintln!("\x1b[2m[{tool_name} failed: {first}]\x1b[0m");
        }
        TurnEvent::Compacted {
            tokens_before,
            tokens_after,
            ..
        } => {
            eprintln!("\x1b[2m[context compacted: ~{tokens_before} → ~{tokens_after} tokens]\x1b[0m");
        }
        TurnEvent::Final { .. } => {
            // Ensure a trailing newline after streamed deltas.
            println!();
        }
        TurnEvent::Error { message } => {
            eprintln!("\x1b[31merror: {message}\x1b[0m");
        }
        TurnEvent::Stopped { .. } => {
            println!();
            eprintln!("(turn stopped)");
        }
        _ => {}
    }
}
