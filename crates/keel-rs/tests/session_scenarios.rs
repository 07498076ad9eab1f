//! End-to-end sessions driven by a scripted model.
//!
//! Each test builds a real workspace in a temp directory, registers the
//! standard tools and replays a fixed sequence of model replies.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use keel_rs::agent::trust::TRUSTED_FOLDERS_FILE;
use keel_rs::api::{ModelReply, ModelTransport, ScriptedTransport};
use keel_rs::context::history::{MARKER_PREFIX, ToolStatus, TurnPayload};
use keel_rs::prelude::*;
use serde_json::json;

fn workspace_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Arc<Workspace>) {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
    let ws = Arc::new(Workspace::open(dir.path()).unwrap());
    (dir, ws)
}

fn tool_payloads(history: &HistoryStore) -> Vec<(ToolStatus, String)> {
    history
        .turns()
        .iter()
        .filter_map(|t| t.tool_result().map(|r| (r.status, r.payload.clone())))
        .collect()
}

/// Approves everything and counts the prompts it answered.
#[derive(Default)]
struct CountingApprover {
    trust_prompts: AtomicU32,
    approvals: AtomicU32,
}

impl EventHandler for CountingApprover {
    fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
        match event {
            SessionEvent::TrustRequired { .. } => {
                self.trust_prompts.fetch_add(1, Ordering::SeqCst);
                Some(EventResponse::Approve)
            }
            SessionEvent::ApprovalRequired { .. } => {
                self.approvals.fetch_add(1, Ordering::SeqCst);
                Some(EventResponse::Approve)
            }
            _ => None,
        }
    }
}

// ── Trust ────────────────────────────────────────────────────────────

#[tokio::test]
async fn trust_is_asked_once_and_remembered_across_sessions() {
    let (dir, ws) = workspace_with(&[]);
    let state = tempfile::tempdir().unwrap();
    let trust_file = state.path().join(TRUSTED_FOLDERS_FILE);
    let tools = ToolSet::new().with_workspace_tools(&ws);

    // First session: unseen root.
    let transport = ScriptedTransport::new([
        ModelReply::call("c1", "write_file", json!({"path": "notes.txt", "content": "one\n"})),
        ModelReply::text("written"),
    ]);
    let handler = CountingApprover::default();
    let permissions = PermissionState::new(
        AgentProfile::default_profile(),
        TrustStore::load(&trust_file).unwrap(),
        ws.root(),
    );
    let mut session = Session::new(&transport, &tools, SessionConfig::new("test", ""), permissions)
        .with_event_handler(&handler);
    let outcome = session.run("write a note").await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(handler.trust_prompts.load(Ordering::SeqCst), 1);
    assert_eq!(handler.approvals.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "one\n");
    assert!(trust_file.exists());

    // Second session: the persisted record is loaded, no trust prompt.
    let transport = ScriptedTransport::new([
        ModelReply::call("c2", "write_file", json!({"path": "notes.txt", "content": "two\n"})),
        ModelReply::text("written again"),
    ]);
    let handler = CountingApprover::default();
    let reloaded = TrustStore::load(&trust_file).unwrap();
    assert!(reloaded.is_trusted(ws.root()));
    let permissions = PermissionState::new(AgentProfile::default_profile(), reloaded, ws.root());
    let mut session = Session::new(&transport, &tools, SessionConfig::new("test", ""), permissions)
        .with_event_handler(&handler);
    session.run("write it again").await;

    assert_eq!(handler.trust_prompts.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "two\n");
}

#[tokio::test]
async fn refused_trust_blocks_the_invocation_but_not_the_session() {
    let (dir, ws) = workspace_with(&[]);
    let tools = ToolSet::new().with_workspace_tools(&ws);
    let transport = ScriptedTransport::new([
        ModelReply::call("c1", "write_file", json!({"path": "x.txt", "content": "x"})),
        ModelReply::text("could not write"),
    ]);
    let permissions =
        PermissionState::new(AgentProfile::autonomous(), TrustStore::in_memory(), ws.root());
    let mut session = Session::new(&transport, &tools, SessionConfig::new("test", ""), permissions);
    let outcome = session.run("write").await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    let results = tool_payloads(session.history());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, ToolStatus::Error);
    assert!(results[0].1.starts_with("Error [permission_denied]"));
    assert!(!dir.path().join("x.txt").exists());
}

// ── Delegation ───────────────────────────────────────────────────────

#[tokio::test]
async fn exhausted_delegation_adds_one_turn_marked_incomplete() {
    let (_dir, ws) = workspace_with(&[("src/lib.rs", "pub fn a() {}\n")]);
    let list = || ModelReply::call("l", "list_directory", json!({}));
    let transport = Arc::new(ScriptedTransport::new([
        ModelReply::call(
            "d1",
            "delegate",
            json!({"task": "survey the tree in ten steps", "profile": "plan", "turn_budget": 3}),
        ),
        // The child burns its whole budget.
        list(),
        list(),
        list(),
        ModelReply::text("parent wraps up"),
    ]));

    let permissions = PermissionState::permissive(ws.root());
    let config = SessionConfig::new("test", "");
    let dispatcher = Dispatcher::new(
        Arc::clone(&transport) as Arc<dyn ModelTransport>,
        Arc::clone(&ws),
        &permissions,
        config.clone(),
    );
    let tools = ToolSet::new()
        .with_workspace_tools(&ws)
        .with(DelegateTool::new(Arc::new(dispatcher)));

    let mut session = Session::new(transport.as_ref(), &tools, config, permissions);
    let outcome = session.run("understand the project").await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.turns_used, 2);
    assert_eq!(transport.request_count(), 5);

    // user task, delegate call, delegation result, final answer
    let history = session.history();
    assert_eq!(history.len(), 4);
    let results = tool_payloads(history);
    assert_eq!(results.len(), 1);
    let (status, payload) = &results[0];
    assert_eq!(*status, ToolStatus::Error);
    assert!(payload.starts_with("Error [delegation_incomplete]"));
    assert!(payload.contains("3/3 turns"));
    assert!(payload.contains("[incomplete: partial result follows]"));
}

#[tokio::test]
async fn completed_delegation_returns_its_summary() {
    let (_dir, ws) = workspace_with(&[("README.md", "hi\n")]);
    let transport = Arc::new(ScriptedTransport::new([
        ModelReply::call("d1", "delegate", json!({"task": "read the readme"})),
        ModelReply::call("r", "read_lines", json!({"path": "README.md", "start": 1, "end": 1})),
        ModelReply::text("README says hi"),
        ModelReply::text("done"),
    ]));
    let permissions = PermissionState::permissive(ws.root());
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let handler: Arc<dyn EventHandler> = Arc::new(FnEventHandler::new(move |event| {
        match event {
            SessionEvent::DelegationStarted { depth, budget, .. } => {
                seen.lock().unwrap().push(format!("start {depth} {budget}"));
            }
            SessionEvent::DelegationFinished { completed, .. } => {
                seen.lock().unwrap().push(format!("finish {completed}"));
            }
            _ => {}
        }
        None
    }));
    let dispatcher = Dispatcher::new(
        Arc::clone(&transport) as Arc<dyn ModelTransport>,
        Arc::clone(&ws),
        &permissions,
        SessionConfig::new("test", ""),
    )
    .with_event_handler(handler);
    let tools = ToolSet::new()
        .with_workspace_tools(&ws)
        .with(DelegateTool::new(Arc::new(dispatcher)));

    let mut session = Session::new(
        transport.as_ref(),
        &tools,
        SessionConfig::new("test", ""),
        permissions,
    );
    session.run("what does the readme say").await;

    let results = tool_payloads(session.history());
    assert_eq!(results[0].0, ToolStatus::Ok);
    assert_eq!(
        results[0].1,
        "[delegation completed in 2 turn(s)]\nREADME says hi"
    );
    assert_eq!(*events.lock().unwrap(), vec!["start 1 10", "finish true"]);
}

// ── Compaction ───────────────────────────────────────────────────────

#[tokio::test]
async fn stale_file_reads_are_replaced_by_markers() {
    let body: String = (1..=400).map(|i| format!("let value_{i} = {i} * 2;\n")).collect();
    let (_dir, ws) = workspace_with(&[("src/big.rs", &body)]);
    let tools = ToolSet::new().with_workspace_tools(&ws);
    let read = |id: &str| {
        ModelReply::call(id, "read_lines", json!({"path": "src/big.rs", "start": 1, "end": 400}))
    };
    let transport = ScriptedTransport::new([
        read("r1"),
        read("r2"),
        read("r3"),
        read("r4"),
        ModelReply::text("read it all"),
    ]);
    let config = SessionConfig::new("test", "sys").with_compaction(
        CompactionConfig::default()
            .with_interval(4)
            .with_retention_window(2),
    );
    let mut session = Session::new(&transport, &tools, config, PermissionState::permissive(ws.root()));
    let outcome = session.run("read the big file").await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.compactions, 1);
    // Turn count never changes; only payloads shrink.
    assert_eq!(transport.message_counts(), vec![2, 4, 6, 8, 10]);

    let history = session.history();
    for index in [2, 4] {
        let turn = history.get(index).unwrap();
        assert!(turn.redacted);
        let marker = turn.marker().expect("marker in place");
        assert_eq!(marker.tool_name, "read_lines");
        assert!(marker.render().starts_with(MARKER_PREFIX));
    }
    for index in [6, 8] {
        let turn = history.get(index).unwrap();
        assert!(!turn.redacted);
        assert!(matches!(&turn.payload, TurnPayload::ToolResult(r) if r.payload.contains("value_400")));
    }

    let rendered = history.to_messages();
    let second = rendered[2].content.as_deref().unwrap();
    assert!(second.contains("Re-run the tool"));
    assert!(!second.contains("value_1 "));
}

// ── References ───────────────────────────────────────────────────────

#[tokio::test]
async fn find_references_skips_ignored_dirs_and_longer_identifiers() {
    let (_dir, ws) = workspace_with(&[
        (
            "src/lib.rs",
            "pub fn process_data(x: u32) -> u32 {\n    x + 1\n}\n\npub fn process_data_v2() {}\n",
        ),
        (
            "src/main.rs",
            "fn main() {\n    let y = keel::process_data(1);\n    println!(\"{y}\");\n}\n",
        ),
        ("dist/bundle.js", "process_data(1);\n"),
        ("tests/t.rs", "// process_data_v2 only\n#[test]\nfn t() { process_data(2); }\n"),
    ]);
    let tools = ToolSet::new().with_workspace_tools(&ws);
    let transport = ScriptedTransport::new([
        ModelReply::call(
            "f1",
            "find_references",
            json!({"symbol": "process_data", "ignore_paths": ["dist"]}),
        ),
        ModelReply::text("three references"),
    ]);
    let mut session =
        Session::new(&transport, &tools, SessionConfig::new("test", ""), PermissionState::permissive(ws.root()));
    session.run("find callers of process_data").await;

    let results = tool_payloads(session.history());
    let (status, payload) = &results[0];
    assert_eq!(*status, ToolStatus::Ok);
    let locations: Vec<&str> = payload
        .lines()
        .skip(1)
        .filter_map(|l| l.split(' ').next())
        .map(|l| l.trim_end_matches(':'))
        .collect();
    assert_eq!(locations, vec!["src/lib.rs:1", "src/main.rs:2", "tests/t.rs:3"]);
    assert!(payload.contains("src/lib.rs:1 (definition)"));
    assert!(!payload.contains("dist/"));
}
