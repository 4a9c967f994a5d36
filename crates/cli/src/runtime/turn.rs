//! Turn execution loop: streams the model's response, checks and runs the
//! tool calls it makes, and repeats until the model answers without tools.
//!
//! Entry points: [`run_turn`] spawns the loop and returns a channel of
//! [`TurnEvent`]s; [`drive_turn`] runs it inline for headless callers.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use tokio_util::sync::CancellationToken;
use sc_domain::capability::ModelInfo;
use sc_domain::config::Config;
use sc_domain::error::{Error, Result};
use sc_domain::stream::{Fragment, Usage};
use sc_domain::tool::{ChatHistoryItem, ToolCall, ToolDefinition};
use sc_permissions::context::approval_pattern;
use sc_permissions::{Permission, PermissionContext};
use sc_providers::{ChatRequest, LlmProvider};
use sc_tools::{truncate_output_from_start, JobManager};

use super::approval::ApprovalDecision;
use super::assemble::ToolCallAssembler;
use super::compact::{compact_history, compaction_threshold, get_history_for_llm};
use super::tokens::{estimate_history, estimate_tools};
use super::tools::{build_tool_definitions, dispatch_tool, ToolEnv};
use super::{workspace_root, AgentSession, Runtime, TurnEvent};
use crate::services::{self, ApiClient, API_CLIENT, CONFIG, JOBS, MODEL, TOOL_PERMISSIONS};

/// Kept free on top of the output reservation when checking that a
/// request fits the context window.
pub const SAFETY_BUFFER_TOKENS: u32 = 256;

const CANCELLED_BY_REJECTION: &str = "Cancelled due to previous tool rejection";
const DENIED_BY_USER: &str = "Permission denied by user";
const INTERRUPTED_BY_USER: &str = "Interrupted by user";
/// Sent in place of an empty message that resumes an interrupted turn.
const CONTINUE_MESSAGE: &str = "continue";

/// How a turn ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Completed { content: String },
    /// Cancelled; `content` is whatever text had streamed.
    Interrupted { content: String },
    /// The tool loop hit `agent.max_tool_loops`.
    LoopLimit { content: String },
}

impl TurnOutcome {
    pub fn content(&self) -> &str {
        match self {
            TurnOutcome::Completed { content }
            | TurnOutcome::Interrupted { content }
            | TurnOutcome::LoopLimit { content } => content,
        }
    }
}

/// A running turn.
pub struct TurnHandle {
    pub run_id: Uuid,
    pub events: mpsc::Receiver<TurnEvent>,
    /// Cancels the turn: the stream stops, running tools are interrupted
    /// and partial output is kept.
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<TurnOutcome>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn in the background.
///
/// The session is locked for the duration of the turn. Errors are sent as
/// [`TurnEvent::Error`] and also returned from the task.
pub fn run_turn(runtime: Arc<Runtime>, session: Arc<Mutex<AgentSession>>, input: String) -> TurnHandle {
    let (tx, rx) = mpsc::channel::<TurnEvent>(64);
    let cancel = CancellationToken::new();
    let run_id = Uuid::new_v4();

    let token = cancel.clone();
    let turn_span = tracing::info_span!("turn", %run_id, mode = tracing::field::Empty);
    let task = tokio::spawn(
        async move {
            tracing::debug!("turn started");
            let mut session = session.lock().await;
            let result = drive_turn(&runtime, &mut session, &input, &tx, &token).await;
            if let Err(e) = &result {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
            result
        }
        .instrument(turn_span),
    );

    TurnHandle {
        run_id,
        events: rx,
        cancel,
        task,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// drive_turn: the tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the loop resolves once per turn.
struct TurnContext {
    config: Arc<Config>,
    provider: Arc<dyn LlmProvider>,
    model: Arc<ModelInfo>,
    env: ToolEnv,
    all_tools: Vec<ToolDefinition>,
    threshold: u32,
}

async fn prepare_turn_context(runtime: &Runtime) -> Result<TurnContext> {
    let services = runtime.services();
    let config = services.get_typed::<Config>(CONFIG).await?;
    let client = services.get_typed::<ApiClient>(API_CLIENT).await?;
    let model = services.get_typed::<ModelInfo>(MODEL).await?;
    let jobs = services.get_typed::<JobManager>(JOBS).await?;
    let threshold = compaction_threshold(&model, &config.compaction)?;

    Ok(TurnContext {
        env: ToolEnv {
            workspace_root: workspace_root(&config)?,
            jobs,
            config: Arc::clone(&config),
        },
        provider: client.provider(),
        config,
        model,
        all_tools: build_tool_definitions(),
        threshold,
    })
}

/// Run one turn inline. Events go to `tx`; a closed receiver is fine as
/// long as nothing needs an interactive approval.
pub async fn drive_turn(
    runtime: &Runtime,
    session: &mut AgentSession,
    input: &str,
    tx: &mpsc::Sender<TurnEvent>,
    cancel: &CancellationToken,
) -> Result<TurnOutcome> {
    let ctx = prepare_turn_context(runtime).await?;
    accept_input(session, input)?;

    let mut turn_usage = Usage::default();
    let mut last_text = String::new();

    for loop_idx in 0..ctx.config.agent.max_tool_loops {
        if cancel.is_cancelled() {
            return Ok(interrupted(session, tx, last_text).await);
        }

        // The permission context is re-read every iteration so mode
        // switches and new allow rules apply to the next request.
        let perms = runtime
            .services()
            .get_typed::<PermissionContext>(TOOL_PERMISSIONS)
            .await?;
        tracing::Span::current().record("mode", tracing::field::display(perms.mode()));
        let tools = perms.filter_tools(&ctx.all_tools);
        tracing::debug!(loop_idx, mode = %perms.mode(), tools = tools.len(), "tool loop iteration");

        let projected = fit_context(&ctx, session, &tools, tx, cancel).await?;
        if cancel.is_cancelled() {
            return Ok(interrupted(session, tx, last_text).await);
        }

        let reserved = ctx.model.reserved_output_tokens();
        let request = ChatRequest {
            messages: get_history_for_llm(&session.history, session.compaction_index),
            tools,
            temperature: Some(ctx.config.llm.temperature),
            max_tokens: Some(reserved),
            model: Some(ctx.model.name.clone()),
        };
        let llm_span = tracing::info_span!(
            "llm.call",
            model = %ctx.model.name,
            projected_tokens = projected,
            input_tokens = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        );
        let response = stream_response(ctx.provider.as_ref(), request, tx, cancel)
            .instrument(llm_span.clone())
            .await?;

        if let Some(u) = &response.usage {
            llm_span.record("input_tokens", u.prompt_tokens);
            llm_span.record("output_tokens", u.completion_tokens);
            turn_usage.prompt_tokens += u.prompt_tokens;
            turn_usage.completion_tokens += u.completion_tokens;
            turn_usage.total_tokens += u.total_tokens;
            session.add_usage(u);
        }

        if response.cancelled {
            if !response.text.is_empty() {
                session.history.push(ChatHistoryItem::assistant(response.text.clone()));
            }
            return Ok(interrupted(session, tx, response.text).await);
        }

        // No tool calls: this is the final answer.
        if response.calls.is_empty() {
            session.history.push(ChatHistoryItem::assistant(response.text.clone()));
            let _ = tx
                .send(TurnEvent::Final {
                    content: response.text.clone(),
                })
                .await;
            send_usage(tx, &turn_usage).await;
            return Ok(TurnOutcome::Completed {
                content: response.text,
            });
        }

        // ── Tool dispatch ──────────────────────────────────────────
        let calls = response.calls;
        session
            .history
            .push(ChatHistoryItem::assistant_with_tools(response.text.clone(), calls.clone()));
        last_text = response.text;
        for call in &calls {
            let _ = tx
                .send(TurnEvent::ToolCallEvent {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;
        }

        let decisions = match authorize_calls(runtime, &ctx.config, &calls, tx, cancel).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                record_unrun(session, &calls, INTERRUPTED_BY_USER);
                return Ok(interrupted(session, tx, last_text).await);
            }
            Err(e) => {
                record_unrun(session, &calls, &e.to_string());
                return Err(e);
            }
        };

        let results = execute_calls(&ctx.env, &calls, decisions, cancel).await;
        let output = &ctx.config.tools.output;
        for (call, (content, is_error)) in calls.iter().zip(results) {
            let content = truncate_output_from_start(&content, output.max_lines, output.max_chars).output;
            session
                .history
                .push(ChatHistoryItem::tool_result(&call.call_id, content.clone()));
            let _ = tx
                .send(TurnEvent::ToolResult {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    content,
                    is_error,
                })
                .await;
        }

        if cancel.is_cancelled() {
            return Ok(interrupted(session, tx, last_text).await);
        }
    }

    let limit = ctx.config.agent.max_tool_loops;
    tracing::warn!(limit, "tool loop limit reached");
    let _ = tx
        .send(TurnEvent::Error {
            message: format!("tool loop limit reached ({limit} iterations)"),
        })
        .await;
    send_usage(tx, &turn_usage).await;
    Ok(TurnOutcome::LoopLimit { content: last_text })
}

fn accept_input(session: &mut AgentSession, input: &str) -> Result<()> {
    if input.trim().is_empty() {
        if !session.interrupted {
            return Err(Error::Other("empty message".into()));
        }
        session.history.push(ChatHistoryItem::user(CONTINUE_MESSAGE));
    } else {
        session.history.push(ChatHistoryItem::user(input));
    }
    session.interrupted = false;
    Ok(())
}

async fn interrupted(session: &mut AgentSession, tx: &mpsc::Sender<TurnEvent>, content: String) -> TurnOutcome {
    session.interrupted = true;
    tracing::info!("turn interrupted");
    let _ = tx
        .send(TurnEvent::Stopped {
            content: content.clone(),
        })
        .await;
    TurnOutcome::Interrupted { content }
}

async fn send_usage(tx: &mpsc::Sender<TurnEvent>, usage: &Usage) {
    let _ = tx
        .send(TurnEvent::UsageEvent {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .await;
}

/// Every tool call needs a result in history, even the ones that never ran.
fn record_unrun(session: &mut AgentSession, calls: &[ToolCall], reason: &str) {
    for call in calls {
        session
            .history
            .push(ChatHistoryItem::tool_result(&call.call_id, reason));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn projected_tokens(session: &AgentSession, tools: &[ToolDefinition]) -> u32 {
    estimate_history(&get_history_for_llm(&session.history, session.compaction_index))
        + estimate_tools(tools)
}

/// Compact when the request would cross the threshold, then check that it
/// fits the window with the output reservation. Returns the projected
/// input size.
async fn fit_context(
    ctx: &TurnContext,
    session: &mut AgentSession,
    tools: &[ToolDefinition],
    tx: &mpsc::Sender<TurnEvent>,
    cancel: &CancellationToken,
) -> Result<u32> {
    let mut projected = projected_tokens(session, tools);

    if ctx.config.compaction.auto && projected > ctx.threshold {
        tracing::info!(projected, threshold = ctx.threshold, "compaction threshold crossed");
        match compact_history(
            ctx.provider.as_ref(),
            &mut session.history,
            session.compaction_index,
            &ctx.config.compaction,
            cancel.child_token(),
        )
        .await
        {
            Ok(Some(outcome)) => {
                session.compaction_index = Some(outcome.index);
                let after = projected_tokens(session, tools);
                let _ = tx
                    .send(TurnEvent::Compacted {
                        tokens_before: projected,
                        tokens_after: after,
                        items_compacted: outcome.items_compacted,
                    })
                    .await;
                projected = after;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "compaction failed, continuing with full history");
            }
        }
    }

    let reserved = ctx.model.reserved_output_tokens();
    let needed = projected
        .saturating_add(reserved)
        .saturating_add(SAFETY_BUFFER_TOKENS);
    if needed > ctx.model.context_window_tokens {
        return Err(Error::Other(format!(
            "conversation needs {projected} tokens plus {reserved} reserved for output, \
             which does not fit the {}-token context window",
            ctx.model.context_window_tokens
        )));
    }
    Ok(projected)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct StreamedResponse {
    text: String,
    calls: Vec<ToolCall>,
    usage: Option<Usage>,
    cancelled: bool,
}

async fn stream_response(
    provider: &dyn LlmProvider,
    request: ChatRequest,
    tx: &mpsc::Sender<TurnEvent>,
    cancel: &CancellationToken,
) -> Result<StreamedResponse> {
    let mut stream = tokio::select! {
        stream = provider.stream_completion(request, cancel.clone()) => stream?,
        _ = cancel.cancelled() => {
            return Ok(StreamedResponse { cancelled: true, ..Default::default() });
        }
    };

    let mut out = StreamedResponse::default();
    let mut assembler = ToolCallAssembler::default();
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = cancel.cancelled() => break,
        };
        let Some(fragment) = next else { break };
        match fragment? {
            Fragment::ContentDelta { text } => {
                out.text.push_str(&text);
                let _ = tx.send(TurnEvent::AssistantDelta { text }).await;
            }
            Fragment::ToolCallDelta(delta) => assembler.push(delta),
            Fragment::Usage(usage) => out.usage = Some(usage),
        }
    }

    out.cancelled = cancel.is_cancelled();
    if !out.cancelled {
        out.calls = assembler.finish();
    }
    Ok(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permissions and execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum CallDecision {
    Run,
    Reject(String),
}

/// Decide every call in order. Once one call is excluded or denied, the
/// rest of the batch is cancelled without being checked. `Ok(None)` means
/// the turn was cancelled while waiting for the user.
async fn authorize_calls(
    runtime: &Runtime,
    config: &Config,
    calls: &[ToolCall],
    tx: &mpsc::Sender<TurnEvent>,
    cancel: &CancellationToken,
) -> Result<Option<Vec<CallDecision>>> {
    let mut decisions = Vec::with_capacity(calls.len());
    let mut rejected = false;

    for call in calls {
        if rejected {
            decisions.push(CallDecision::Reject(CANCELLED_BY_REJECTION.into()));
            continue;
        }

        let perms = runtime
            .services()
            .get_typed::<PermissionContext>(TOOL_PERMISSIONS)
            .await?;
        let check = perms.check(call);
        tracing::debug!(
            tool = %call.tool_name,
            permission = %check.permission,
            policy = ?check.matched_policy.as_ref().map(ToString::to_string),
            "permission check"
        );

        match check.permission {
            Permission::Allow => decisions.push(CallDecision::Run),
            Permission::Exclude => {
                rejected = true;
                decisions.push(CallDecision::Reject(format!(
                    "Tool {} is excluded by the active permission policy",
                    call.tool_name
                )));
            }
            Permission::Ask if config.agent.headless => {
                return Err(Error::PermissionRequired {
                    tool: approval_pattern(call),
                });
            }
            Permission::Ask => match ask_user(runtime, call, tx, cancel).await? {
                None => return Ok(None),
                Some(ApprovalDecision::Deny) => {
                    rejected = true;
                    decisions.push(CallDecision::Reject(DENIED_BY_USER.into()));
                }
                Some(ApprovalDecision::Once) => decisions.push(CallDecision::Run),
                Some(ApprovalDecision::Always) => {
                    if let Err(e) = services::always_allow(runtime.services(), &approval_pattern(call)).await {
                        tracing::warn!(error = %e, "failed to persist allow rule");
                    }
                    decisions.push(CallDecision::Run);
                }
            },
        }
    }
    Ok(Some(decisions))
}

/// Park an approval and wait for the front-end. `None` on cancellation.
async fn ask_user(
    runtime: &Runtime,
    call: &ToolCall,
    tx: &mpsc::Sender<TurnEvent>,
    cancel: &CancellationToken,
) -> Result<Option<ApprovalDecision>> {
    let approvals = runtime.approvals();
    let (info, rx) = approvals.request(call);
    let event = TurnEvent::ApprovalRequested {
        approval_id: info.id,
        call_id: info.call_id.clone(),
        tool_name: info.tool_name.clone(),
        display: info.display.clone(),
        pattern: info.pattern.clone(),
    };
    if tx.send(event).await.is_err() {
        // Nobody is listening, so nobody can answer.
        approvals.discard(&info.id);
        return Err(Error::PermissionRequired { tool: info.pattern });
    }

    tokio::select! {
        decision = rx => Ok(Some(decision.unwrap_or(ApprovalDecision::Deny))),
        _ = cancel.cancelled() => {
            approvals.discard(&info.id);
            Ok(None)
        }
    }
}

/// Run the approved calls concurrently; results come back in call order.
async fn execute_calls(
    env: &ToolEnv,
    calls: &[ToolCall],
    decisions: Vec<CallDecision>,
    cancel: &CancellationToken,
) -> Vec<(String, bool)> {
    let futures = calls.iter().zip(decisions).map(|(call, decision)| {
        let tool_span = tracing::info_span!("tool.call", tool_name = %call.tool_name, call_id = %call.call_id);
        let cancel = cancel.child_token();
        async move {
            match decision {
                CallDecision::Run => dispatch_tool(env, call, &cancel).await,
                CallDecision::Reject(reason) => (reason, true),
            }
        }
        .instrument(tool_span)
    });
    futures_util::future::join_all(futures).await
}
