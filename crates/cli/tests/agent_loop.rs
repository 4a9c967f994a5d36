//! End-to-end turns against a scripted provider: tool calls, permissions,
//! approvals, compaction and cancellation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use sc_cli::runtime::{drive_turn, run_turn, AgentSession, ApprovalDecision, Runtime, TurnEvent, TurnOutcome};
use sc_cli::services::{build_services, ApiClient, ConfigSource, SessionOverrides, API_CLIENT, TOOL_PERMISSIONS};
use tokio_util::sync::CancellationToken;
use sc_domain::config::{Config, PermissionMode};
use sc_domain::error::Error;
use sc_domain::stream::Fragment;
use sc_domain::tool::{ChatHistoryItem, Role, ToolCall};
use sc_permissions::{Permission, PermissionContext};
use sc_providers::{ScriptStep, ScriptedProvider};

struct Harness {
    dir: tempfile::TempDir,
    provider: Arc<ScriptedProvider>,
    runtime: Arc<Runtime>,
}

fn harness_with(steps: Vec<ScriptStep>, overrides: SessionOverrides, tweak: impl FnOnce(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.permissions.policy_file = Some(dir.path().join("permissions.yaml"));
    config.agent.workspace_root = Some(dir.path().to_path_buf());
    config.llm.context_window_tokens = Some(200_000);
    config.llm.max_output_tokens = Some(4_000);
    tweak(&mut config);

    let services = build_services(ConfigSource::Fixed(config), overrides).unwrap();
    let provider = Arc::new(ScriptedProvider::new(steps));
    services.set(API_CLIENT, ApiClient::new(provider.clone()));

    Harness {
        dir,
        provider,
        runtime: Arc::new(Runtime::new(services)),
    }
}

fn harness(steps: Vec<ScriptStep>) -> Harness {
    harness_with(steps, SessionOverrides::default(), |_| {})
}

fn call_step(calls: &[(&str, &str, serde_json::Value)]) -> ScriptStep {
    ScriptStep::reply(
        calls
            .iter()
            .enumerate()
            .map(|(i, (id, name, args))| Fragment::tool_call(i, Some(*id), Some(*name), args.to_string()))
            .collect(),
    )
}

/// Drive a turn inline, collecting its events.
async fn drive(h: &Harness, session: &mut AgentSession, input: &str) -> (Result<TurnOutcome, Error>, Vec<TurnEvent>) {
    let (tx, mut rx) = mpsc::channel(256);
    let outcome = drive_turn(&h.runtime, session, input, &tx, &CancellationToken::new()).await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    (outcome, events)
}

fn tool_results(session: &AgentSession) -> Vec<(String, String)> {
    session
        .history
        .iter()
        .filter(|h| h.role == Role::Tool)
        .map(|h| (h.tool_call_id.clone().unwrap_or_default(), h.content.clone()))
        .collect()
}

fn tool_names(req: &sc_providers::ChatRequest) -> Vec<String> {
    req.tools.iter().map(|t| t.name.clone()).collect()
}

#[tokio::test]
async fn split_tool_call_runs_then_answers() {
    let h = harness(vec![
        ScriptStep::reply(vec![
            Fragment::content("Let me look. "),
            Fragment::tool_call(0, Some("c1"), Some("Read"), "{\"file_path\":"),
            Fragment::tool_call(0, None, None, "\"notes.txt\"}"),
        ]),
        ScriptStep::text("The file says hello."),
    ]);
    std::fs::write(h.dir.path().join("notes.txt"), "hello\n").unwrap();

    let mut session = h.runtime.new_session().await.unwrap();
    let (outcome, events) = drive(&h, &mut session, "what is in notes.txt?").await;

    assert_eq!(
        outcome.unwrap(),
        TurnOutcome::Completed {
            content: "The file says hello.".into()
        }
    );
    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::ToolCallEvent { tool_name, arguments, .. }
            if tool_name == "Read" && arguments == &json!({"file_path": "notes.txt"})
    )));
    let results = tool_results(&session);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "c1");
    assert!(results[0].1.contains("hello"));

    // The second request carries the assistant call and its result.
    let second = &h.provider.requests()[1];
    assert!(second.messages.iter().any(|m| m.role == Role::Tool));
    assert!(matches!(events.last(), Some(TurnEvent::UsageEvent { .. })));
}

#[tokio::test]
async fn excluded_call_cancels_the_rest_of_the_batch() {
    let overrides = SessionOverrides {
        exclude: vec!["Bash".into()],
        ..Default::default()
    };
    let h = harness_with(
        vec![
            call_step(&[
                ("c1", "Bash", json!({"command": "make clean"})),
                ("c2", "List", json!({"dirpath": "."})),
            ]),
            ScriptStep::text("ok"),
        ],
        overrides,
        |_| {},
    );

    let mut session = h.runtime.new_session().await.unwrap();
    let (outcome, _) = drive(&h, &mut session, "clean up").await;
    assert!(matches!(outcome.unwrap(), TurnOutcome::Completed { .. }));

    let results = tool_results(&session);
    assert_eq!(results[0].1, "Tool Bash is excluded by the active permission policy");
    assert_eq!(results[1].1, "Cancelled due to previous tool rejection");

    // Excluded tools are not offered to the model at all.
    assert!(!tool_names(&h.provider.requests()[0]).contains(&"Bash".to_owned()));
}

#[tokio::test]
async fn headless_ask_fails_the_turn() {
    let h = harness_with(
        vec![call_step(&[("c1", "Write", json!({"file_path": "a.txt", "content": "x"}))])],
        SessionOverrides {
            headless: true,
            ..Default::default()
        },
        |_| {},
    );

    let mut session = h.runtime.new_session().await.unwrap();
    let (outcome, _) = drive(&h, &mut session, "write a file").await;

    let err = outcome.unwrap_err();
    assert!(matches!(&err, Error::PermissionRequired { tool } if tool == "Write"));
    assert!(!h.dir.path().join("a.txt").exists());
    // The unrun call still has a result so the history stays well-formed.
    assert_eq!(tool_results(&session).len(), 1);
}

#[tokio::test]
async fn approvals_flow_through_turn_events() {
    let h = harness(vec![
        call_step(&[("c1", "Write", json!({"file_path": "a.txt", "content": "one"}))]),
        call_step(&[("c2", "Write", json!({"file_path": "b.txt", "content": "two"}))]),
        ScriptStep::text("done"),
    ]);
    let session = Arc::new(Mutex::new(h.runtime.new_session().await.unwrap()));
    let mut handle = run_turn(Arc::clone(&h.runtime), Arc::clone(&session), "write two files".into());

    let mut decisions = vec![ApprovalDecision::Once, ApprovalDecision::Deny].into_iter();
    while let Some(event) = handle.events.recv().await {
        if let TurnEvent::ApprovalRequested { approval_id, display, .. } = event {
            assert!(display.starts_with("Write("));
            assert!(h.runtime.approvals().resolve(&approval_id, decisions.next().unwrap()));
        }
    }
    assert!(matches!(handle.task.await.unwrap().unwrap(), TurnOutcome::Completed { .. }));

    assert_eq!(std::fs::read_to_string(h.dir.path().join("a.txt")).unwrap(), "one");
    assert!(!h.dir.path().join("b.txt").exists());
    let session = session.lock().await;
    assert_eq!(tool_results(&session)[1].1, "Permission denied by user");
}

#[tokio::test]
async fn always_allow_persists_and_keeps_the_mode() {
    let h = harness(vec![
        call_step(&[("c1", "Write", json!({"file_path": "a.txt", "content": "one"}))]),
        ScriptStep::text("done"),
    ]);
    let session = Arc::new(Mutex::new(h.runtime.new_session().await.unwrap()));
    let mut handle = run_turn(Arc::clone(&h.runtime), session, "write".into());

    while let Some(event) = handle.events.recv().await {
        if let TurnEvent::ApprovalRequested { approval_id, pattern, .. } = event {
            assert_eq!(pattern, "Write");
            h.runtime.approvals().resolve(&approval_id, ApprovalDecision::Always);
        }
    }
    handle.task.await.unwrap().unwrap();

    let saved = std::fs::read_to_string(h.dir.path().join("permissions.yaml")).unwrap();
    assert!(saved.contains("Write"));

    let perms = h
        .runtime
        .services()
        .get_typed::<PermissionContext>(TOOL_PERMISSIONS)
        .await
        .unwrap();
    assert_eq!(perms.mode(), PermissionMode::Normal);
    let next = ToolCall {
        call_id: "x".into(),
        tool_name: "Write".into(),
        arguments: json!({"file_path": "c.txt", "content": ""}),
    };
    assert_eq!(perms.check(&next).permission, Permission::Allow);
}

#[tokio::test]
async fn mode_switch_applies_to_the_next_request() {
    let h = harness(vec![
        call_step(&[("c1", "Write", json!({"file_path": "a.txt", "content": "one"}))]),
        ScriptStep::text("planned"),
    ]);
    let session = Arc::new(Mutex::new(h.runtime.new_session().await.unwrap()));
    let mut handle = run_turn(Arc::clone(&h.runtime), session, "go".into());

    while let Some(event) = handle.events.recv().await {
        if let TurnEvent::ApprovalRequested { approval_id, .. } = event {
            h.runtime.set_mode(PermissionMode::Plan).await.unwrap();
            h.runtime.approvals().resolve(&approval_id, ApprovalDecision::Once);
        }
    }
    handle.task.await.unwrap().unwrap();

    let requests = h.provider.requests();
    assert!(tool_names(&requests[0]).contains(&"Write".to_owned()));
    let second = tool_names(&requests[1]);
    assert!(!second.contains(&"Write".to_owned()));
    assert!(!second.contains(&"Edit".to_owned()));
    assert!(second.contains(&"Read".to_owned()));
}

#[tokio::test]
async fn long_history_is_compacted_before_the_request() {
    let h = harness_with(
        vec![ScriptStep::text("summary of the earlier work"), ScriptStep::text("answer")],
        SessionOverrides::default(),
        |c| {
            c.llm.context_window_tokens = Some(20_000);
            c.llm.max_output_tokens = Some(2_000);
        },
    );
    let mut session = h.runtime.new_session().await.unwrap();
    session.history.push(ChatHistoryItem::user("a".repeat(60_000)));
    session.history.push(ChatHistoryItem::assistant("b".repeat(60_000)));

    let (outcome, events) = drive(&h, &mut session, "and now?").await;
    assert_eq!(outcome.unwrap().content(), "answer");

    let compacted = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::Compacted {
                tokens_before,
                tokens_after,
                items_compacted,
            } => Some((*tokens_before, *tokens_after, *items_compacted)),
            _ => None,
        })
        .expect("compaction event");
    assert!(compacted.0 > compacted.1);
    assert_eq!(compacted.2, 2);

    let index = session.compaction_index.expect("marker index");
    assert!(session.history[index].is_compaction_marker());
    // History is kept; only the request window shrinks.
    assert_eq!(session.history[1].content.len(), 60_000);

    let requests = h.provider.requests();
    assert!(requests[0].tools.is_empty());
    let sent = &requests[1].messages;
    assert_eq!(sent[0].role, Role::System);
    assert!(sent[1].is_compaction_marker());
    assert_eq!(sent.last().unwrap().content, "and now?");
}

#[tokio::test]
async fn cancelled_turn_keeps_partial_text_and_resumes() {
    let mut slow = ScriptStep::reply(vec![Fragment::content("partial "), Fragment::content("rest")]);
    slow.delay_ms = 300;
    let h = harness(vec![slow, ScriptStep::text("resumed")]);
    let session = Arc::new(Mutex::new(h.runtime.new_session().await.unwrap()));

    let mut handle = run_turn(Arc::clone(&h.runtime), Arc::clone(&session), "long task".into());
    while let Some(event) = handle.events.recv().await {
        if matches!(event, TurnEvent::AssistantDelta { .. }) {
            handle.cancel.cancel();
        }
    }
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Interrupted {
            content: "partial ".into()
        }
    );
    assert!(session.lock().await.interrupted);

    let handle = run_turn(Arc::clone(&h.runtime), Arc::clone(&session), String::new());
    let outcome = handle.task.await.unwrap().unwrap();
    assert_eq!(outcome.content(), "resumed");

    let resumed = &h.provider.requests()[1].messages;
    let n = resumed.len();
    assert_eq!(resumed[n - 2].content, "partial ");
    assert_eq!(resumed[n - 1].content, "continue");
    assert!(!session.lock().await.interrupted);
}

#[tokio::test]
async fn empty_message_without_interrupt_is_rejected() {
    let h = harness(vec![]);
    let mut session = h.runtime.new_session().await.unwrap();
    let (outcome, _) = drive(&h, &mut session, "   ").await;
    assert!(outcome.is_err());
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn loop_limit_stops_the_turn() {
    let h = harness_with(
        vec![
            call_step(&[("c1", "List", json!({"dirpath": "."}))]),
            call_step(&[("c2", "List", json!({"dirpath": "."}))]),
            ScriptStep::text("never reached"),
        ],
        SessionOverrides::default(),
        |c| c.agent.max_tool_loops = 2,
    );
    let mut session = h.runtime.new_session().await.unwrap();
    let (outcome, events) = drive(&h, &mut session, "loop").await;

    assert!(matches!(outcome.unwrap(), TurnOutcome::LoopLimit { .. }));
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::Error { message } if message.contains("loop limit"))));
    assert_eq!(h.provider.remaining(), 1);
}

#[tokio::test]
async fn malformed_arguments_become_an_empty_object() {
    let h = harness(vec![
        ScriptStep::reply(vec![Fragment::tool_call(0, Some("c1"), Some("Read"), "{not json")]),
        ScriptStep::text("sorry"),
    ]);
    let mut session = h.runtime.new_session().await.unwrap();
    let (outcome, events) = drive(&h, &mut session, "read").await;
    assert!(outcome.is_ok());

    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::ToolCallEvent { arguments, .. } if arguments == &json!({})
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::ToolResult { is_error: true, content, .. } if content.contains("invalid Read arguments")
    )));
}

#[tokio::test]
async fn long_single_turn_tool_loop_is_compacted() {
    let read = |id: &str| call_step(&[(id, "Read", json!({"file_path": "big.txt"}))]);
    let h = harness_with(
        vec![
            read("c1"),
            read("c2"),
            read("c3"),
            ScriptStep::text("read big.txt twice, nothing unusual"),
            ScriptStep::text("done"),
        ],
        SessionOverrides {
            mode: Some(PermissionMode::Auto),
            ..Default::default()
        },
        |c| {
            c.llm.context_window_tokens = Some(20_000);
            c.llm.max_output_tokens = Some(2_000);
        },
    );
    let line = format!("{}\n", "x".repeat(99));
    std::fs::write(h.dir.path().join("big.txt"), line.repeat(200)).unwrap();

    let mut session = h.runtime.new_session().await.unwrap();
    let (outcome, events) = drive(&h, &mut session, "read big.txt three times").await;
    assert_eq!(outcome.unwrap().content(), "done");
    assert!(events.iter().any(|e| matches!(e, TurnEvent::Compacted { .. })));

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests[3].tools.is_empty());

    // The final request holds the request, the latest call and its result.
    let sent = &requests[4].messages;
    assert_eq!(sent[0].role, Role::System);
    assert!(sent[1].is_compaction_marker());
    assert_eq!(sent[2].content, "read big.txt three times");
    assert_eq!(sent[3].tool_calls[0].call_id, "c3");
    assert_eq!(sent.len(), 5);
    assert_eq!(tool_results(&session).len(), 3);
}
