//! `serialcode chat`: interactive REPL command.
//!
//! Opens a readline loop that sends each line to the agent and streams
//! the response back.  Ctrl+C during a turn stops it; an empty line
//! afterwards lets the agent pick up where it left off.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use sc_domain::config::PermissionMode;
use sc_services::ServiceContainer;
use sc_tools::JobManager;
use tokio::sync::Mutex;

use crate::runtime::{run_turn, AgentSession, Runtime};
use crate::services::JOBS;

use super::run::drain_turn;

/// What the REPL does after a slash command.
enum SlashOutcome {
    Continue,
    Exit,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the interactive chat REPL.
pub async fn chat(services: Arc<ServiceContainer>) -> anyhow::Result<()> {
    let runtime = Arc::new(Runtime::new(Arc::clone(&services)));
    let session = Arc::new(Mutex::new(runtime.new_session().await?));

    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".serialcode")
        .join("chat_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    // Keep stdout clean for assistant output.
    eprintln!("SerialCode interactive chat");
    eprintln!(
        "Mode: {}  |  Type /help for commands, Ctrl+D to exit",
        runtime.mode().await?
    );
    eprintln!();

    loop {
        let readline = rl.readline("you> ");

        match readline {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    if session.lock().await.interrupted {
                        send_message(&runtime, &session, String::new()).await;
                    }
                    continue;
                }

                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    match handle_slash_command(trimmed, &runtime, &session).await {
                        SlashOutcome::Exit => break,
                        SlashOutcome::Continue => continue,
                    }
                }

                send_message(&runtime, &session, trimmed.to_owned()).await;
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                break;
            }
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();

    if let Ok(jobs) = services.get_typed::<JobManager>(JOBS).await {
        jobs.cancel_all();
    }

    eprintln!("Goodbye!");
    Ok(())
}

async fn send_message(runtime: &Arc<Runtime>, session: &Arc<Mutex<AgentSession>>, input: String) {
    let handle = run_turn(Arc::clone(runtime), Arc::clone(session), input);
    drain_turn(runtime, handle, false).await;
    if session.lock().await.interrupted {
        eprintln!("\x1B[2m(press Enter to continue the interrupted turn)\x1B[0m");
    }
    println!();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash command handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_slash_command(
    input: &str,
    runtime: &Runtime,
    session: &Arc<Mutex<AgentSession>>,
) -> SlashOutcome {
    let (cmd, arg) = match input.split_once(' ') {
        Some((c, a)) => (c, Some(a.trim()).filter(|a| !a.is_empty())),
        None => (input, None),
    };

    match cmd {
        "/exit" | "/quit" => return SlashOutcome::Exit,

        "/mode" => match arg {
            Some(raw) => match raw.parse::<PermissionMode>() {
                Ok(mode) => match runtime.set_mode(mode).await {
                    Ok(()) => eprintln!("Mode set to: {mode}"),
                    Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
                },
                Err(e) => eprintln!("{e}"),
            },
            None => {
                match runtime.mode().await {
                    Ok(mode) => eprintln!("Current mode: {mode}"),
                    Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
                }
                eprintln!("Usage: /mode <normal|plan|auto>");
            }
        },

        "/compact" => {
            let mut session = session.lock().await;
            match runtime.compact(&mut session, CancellationToken::new()).await {
                Ok(Some(outcome)) => {
                    eprintln!("Compacted {} history items.", outcome.items_compacted)
                }
                Ok(None) => eprintln!("Nothing to compact."),
                Err(e) => eprintln!("\x1B[31mcompaction failed: {e}\x1B[0m"),
            }
        }

        "/reset" => match runtime.new_session().await {
            Ok(fresh) => {
                *session.lock().await = fresh;
                eprintln!("Session reset.");
            }
            Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
        },

        "/status" => {
            let session = session.lock().await;
            eprintln!(
                "History: {} items  |  Tokens used: {} in / {} out",
                session.history.len(),
                session.usage.prompt_tokens,
                session.usage.completion_tokens,
            );
            for status in runtime.services().statuses() {
                match &status.error {
                    Some(err) => eprintln!("  {:<18} {:?}  {err}", status.name, status.state),
                    None => eprintln!("  {:<18} {:?}", status.name, status.state),
                }
            }
        }

        "/clear" => {
            // Clear screen and move the cursor to the top-left.
            eprint!("\x1B[2J\x1B[1;1H");
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /mode [mode]     Show or switch the permission mode");
            eprintln!("  /compact         Summarize older history now");
            eprintln!("  /reset           Start a fresh session");
            eprintln!("  /status          Show token usage and service states");
            eprintln!("  /clear           Clear the screen");
            eprintln!("  /exit, /quit     Exit the chat");
            eprintln!("  /help            Show this help");
        }

        other => {
            eprintln!("Unknown command: {other}  (type /help for a list)");
        }
    }

    SlashOutcome::Continue
}
