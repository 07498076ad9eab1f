//! The session loop: model turns, gated tool execution and compaction.
//!
//! A [`Session`] owns one [`HistoryStore`] and one [`PermissionState`] and
//! drives them through an explicit [`LoopState`] machine:
//!
//! ```text
//! Idle ──> AwaitingModel ──> ExecutingTool ──> Idle ──> ...
//!               │                                 │
//!               └──> Finished        Cancelled <──┘ (stop signal)
//! ```
//!
//! Invocations run one at a time, in the order the model asked for them.
//! Every invocation, allowed or not, leaves exactly one tool-result turn in
//! the history, and the compaction engine runs after every appended turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::agent::config::SessionConfig;
use crate::agent::events::{EventHandler, EventResponse, NoopHandler, SessionEvent};
use crate::agent::permission::{GateDecision, PermissionState, RiskClass};
use crate::api::{ModelRequest, ModelTransport, UsageTracker, generate_session_id};
use crate::context::compaction::CompactionEngine;
use crate::context::history::{HistoryStore, ToolInvocation, ToolResult};
use crate::tools::ToolSet;
use crate::{EngineError, Message, ToolCall};

// ── Loop state ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    AwaitingModel,
    ExecutingTool,
    Cancelled,
    Finished,
}

// ── Cancellation ──────────────────────────────────────────────────

/// Shared stop signal. Clones observe the same flag, so a flag handed to a
/// delegation dispatcher stops every child session too.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ── Outcome ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The model produced a final answer.
    Completed,
    /// The turn limit ran out first.
    Partial,
    Cancelled,
    /// The transport failed.
    Failed,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    /// Final answer, or the last text the model produced.
    pub text: String,
    pub turns_used: u32,
    /// Sweeps that redacted at least one turn.
    pub compactions: u32,
    pub usage: UsageTracker,
    pub error: Option<EngineError>,
}

impl SessionOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

// ── Session ───────────────────────────────────────────────────────

/// One agent session over a tool set.
///
/// The transport, tools and event handler are borrowed and must outlive
/// [`run`](Self::run). Bind handlers to a `let` before building the session:
///
/// ```ignore
/// let handler = CompositeEventHandler::new().with(LoggingHandler);
/// let mut session = Session::new(&client, &tools, config, permissions)
///     .with_event_handler(&handler);
/// let outcome = session.run("Add a --json flag").await;
/// println!("{} turns in history", session.history().len());
/// ```
pub struct Session<'a> {
    transport: &'a dyn ModelTransport,
    tools: &'a ToolSet,
    config: SessionConfig,
    permissions: PermissionState,
    events: &'a dyn EventHandler,
    cancel: CancelFlag,
    history: HistoryStore,
    compaction: Option<CompactionEngine>,
    state: LoopState,
    session_id: String,
}

impl<'a> Session<'a> {
    pub fn new(
        transport: &'a dyn ModelTransport,
        tools: &'a ToolSet,
        config: SessionConfig,
        permissions: PermissionState,
    ) -> Self {
        let compaction = config.compaction.active().cloned().map(CompactionEngine::new);
        Self {
            transport,
            tools,
            config,
            permissions,
            events: &NoopHandler,
            cancel: CancelFlag::new(),
            history: HistoryStore::new(),
            compaction,
            state: LoopState::Idle,
            session_id: generate_session_id(),
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.events = handler;
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn permissions(&self) -> &PermissionState {
        &self.permissions
    }

    pub fn permissions_mut(&mut self) -> &mut PermissionState {
        &mut self.permissions
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run the loop for `task` until the model answers, the turn limit is
    /// reached, the transport fails or the cancel flag is raised.
    pub async fn run(&mut self, task: &str) -> SessionOutcome {
        info!(
            "Session {} started: model={}, profile={}, max_turns={}",
            self.session_id,
            self.config.model,
            self.permissions.profile().name,
            self.config.max_turns
        );

        let tool_defs = self.tools.definitions();
        let mut usage = UsageTracker::default();
        let mut compactions = 0;
        let mut last_text = String::new();
        let mut turns_used = 0;

        self.history.append_user(task);
        compactions += self.compact();

        let status = 'turns: loop {
            if turns_used >= self.config.max_turns {
                self.events.on_event(&SessionEvent::TurnLimitReached {
                    max_turns: self.config.max_turns,
                });
                info!("Session {} hit the turn limit", self.session_id);
                break SessionStatus::Partial;
            }
            if self.cancel.is_cancelled() {
                break SessionStatus::Cancelled;
            }
            turns_used += 1;

            let start = SessionEvent::TurnStart {
                turn: turns_used,
                max_turns: self.config.max_turns,
                history_turns: self.history.len(),
                history_chars: self.history.total_size(),
            };
            if let Some(EventResponse::InjectMessage(text)) = self.events.on_event(&start) {
                self.history.append_user(text);
                compactions += self.compact();
            }

            self.transition(LoopState::AwaitingModel);
            let messages = self.request_messages();
            let request = ModelRequest {
                model: &self.config.model,
                messages: &messages,
                tools: &tool_defs,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };
            let reply = tokio::select! {
                reply = self.transport.complete(request) => reply,
                _ = self.cancel.cancelled() => break 'turns SessionStatus::Cancelled,
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Session {} transport failure: {e}", self.session_id);
                    self.transition(LoopState::Finished);
                    return SessionOutcome {
                        status: SessionStatus::Failed,
                        text: e.to_tool_payload(),
                        turns_used,
                        compactions,
                        usage,
                        error: Some(e),
                    };
                }
            };

            usage.record(reply.usage.as_ref());
            if let Some(u) = &reply.usage {
                self.events.on_event(&SessionEvent::TokenUsage {
                    prompt_tokens: u.prompt_tokens.unwrap_or(0),
                    completion_tokens: u.completion_tokens.unwrap_or(0),
                });
            }
            if let Some(text) = reply.text.as_deref().filter(|t| !t.is_empty()) {
                self.events.on_event(&SessionEvent::Text(text));
                last_text = text.to_string();
            }

            if reply.is_final() {
                self.history.append_assistant(reply.text, Vec::new());
                compactions += self.compact();
                break SessionStatus::Completed;
            }

            self.events.on_event(&SessionEvent::ToolCallsReceived {
                turn: turns_used,
                count: reply.tool_calls.len(),
            });
            self.history
                .append_assistant(reply.text, reply.tool_calls.clone());
            compactions += self.compact();

            self.transition(LoopState::ExecutingTool);
            for call in &reply.tool_calls {
                if self.cancel.is_cancelled() {
                    break 'turns SessionStatus::Cancelled;
                }
                let result = self.invoke(call).await;
                self.history.append_tool_result(result);
                compactions += self.compact();
                if self.cancel.is_cancelled() {
                    break 'turns SessionStatus::Cancelled;
                }
            }
            self.transition(LoopState::Idle);
        };

        match status {
            SessionStatus::Cancelled => {
                self.transition(LoopState::Cancelled);
                self.events.on_event(&SessionEvent::Cancelled);
                info!("Session {} cancelled", self.session_id);
            }
            SessionStatus::Completed => {
                self.transition(LoopState::Finished);
                self.events.on_event(&SessionEvent::Finished);
            }
            _ => self.transition(LoopState::Finished),
        }
        info!(
            "Session {} ended: {status:?} after {turns_used} turn(s), {}",
            self.session_id,
            usage.summary()
        );

        SessionOutcome {
            status,
            text: last_text,
            turns_used,
            compactions,
            usage,
            error: None,
        }
    }

    fn transition(&mut self, to: LoopState) {
        if self.state != to {
            self.events.on_event(&SessionEvent::StateChanged {
                from: self.state,
                to,
            });
            self.state = to;
        }
    }

    fn request_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !self.config.system_prompt.is_empty() {
            messages.push(Message::system(self.config.system_prompt.clone()));
        }
        messages.extend(self.history.to_messages());
        messages
    }

    /// Run the compaction schedule against the turn just appended. Returns 1
    /// when something was redacted.
    fn compact(&mut self) -> u32 {
        let Some(engine) = self.compaction.as_mut() else {
            return 0;
        };
        let counter = self.history.next_index();
        let report = engine.maybe_compact(&mut self.history, counter);
        for (turn, reason) in &report.skipped {
            warn!("Compaction skipped turn {turn}: {reason}");
        }
        if report.is_noop() {
            return 0;
        }
        self.events.on_event(&SessionEvent::Compacted(&report));
        1
    }

    /// Gate, execute and wrap a single call. Never fails; every error ends
    /// up in the returned result.
    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let name = call.function.name.as_str();
        let arguments = call.function.arguments.as_str();

        let risk = match self.tools.risk_class_of(name) {
            Ok(risk) => risk,
            Err(e) => {
                warn!("Model requested unknown tool '{name}'");
                return self.finish(ToolInvocation::from_call(call, RiskClass::ReadOnly), Err(e));
            }
        };
        let invocation = ToolInvocation::from_call(call, risk);

        if let Err(e) = self.authorize(name, arguments, risk) {
            let reason = e.to_string();
            self.events.on_event(&SessionEvent::PermissionDenied {
                name,
                reason: &reason,
            });
            return self.finish(invocation, Err(e));
        }

        self.events
            .on_event(&SessionEvent::ToolExecuting { name, arguments });
        let output = tokio::select! {
            out = self.tools.execute(name, arguments) => out,
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
        };
        self.finish(invocation, output)
    }

    /// Walk the gate until it says proceed or refuses.
    fn authorize(&self, name: &str, arguments: &str, risk: RiskClass) -> crate::Result<()> {
        loop {
            match self.permissions.evaluate(risk) {
                GateDecision::Proceed => return Ok(()),
                GateDecision::NeedsTrust => {
                    let root = self.permissions.root().to_path_buf();
                    match self.events.on_event(&SessionEvent::TrustRequired { root: &root }) {
                        Some(EventResponse::Approve) => {
                            if let Err(e) = self.permissions.grant_trust() {
                                // Trust is already recorded in memory.
                                warn!("Could not persist trust for {}: {e}", root.display());
                            }
                            info!("Trusted workspace root {}", root.display());
                        }
                        Some(EventResponse::Deny(reason)) => {
                            return Err(EngineError::PermissionDenied(format!(
                                "workspace root {} is not trusted: {reason}",
                                root.display()
                            )));
                        }
                        _ => {
                            return Err(EngineError::PermissionDenied(format!(
                                "workspace root {} is not trusted",
                                root.display()
                            )));
                        }
                    }
                }
                GateDecision::NeedsConfirmation => {
                    let event = SessionEvent::ApprovalRequired {
                        name,
                        arguments,
                        risk,
                    };
                    return match self.events.on_event(&event) {
                        Some(EventResponse::Approve) => Ok(()),
                        Some(EventResponse::Deny(reason)) => Err(EngineError::PermissionDenied(
                            format!("{name} was refused: {reason}"),
                        )),
                        _ => Err(EngineError::PermissionDenied(format!(
                            "{name} ({risk}) was not confirmed"
                        ))),
                    };
                }
                GateDecision::Denied(reason) => return Err(EngineError::PermissionDenied(reason)),
            }
        }
    }

    fn finish(&self, invocation: ToolInvocation, output: crate::Result<String>) -> ToolResult {
        let result = match output {
            Ok(payload) => ToolResult::ok(invocation, payload),
            Err(e) => {
                debug!("{} failed: {e}", invocation.tool_name);
                ToolResult::error(invocation, &e)
            }
        };
        self.events.on_event(&SessionEvent::ToolResult {
            name: &result.invocation.tool_name,
            call_id: &result.invocation.call_id,
            result: &result.payload,
            ok: result.is_ok(),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::agent::events::FnEventHandler;
    use crate::agent::permission::AgentProfile;
    use crate::agent::trust::TrustStore;
    use crate::api::{ModelReply, ScriptedTransport};
    use crate::context::compaction::CompactionConfig;
    use crate::context::history::TurnPayload;
    use crate::tools::FnTool;
    use crate::ToolDef;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Empty {}

    fn tools() -> ToolSet {
        ToolSet::new()
            .with(FnTool::new(
                ToolDef::new("echo", "echo", serde_json::json!({"type": "object"})),
                |_: Empty| async { Ok("echoed".to_string()) },
            ))
            .with(
                FnTool::new(
                    ToolDef::new("wipe", "wipe", serde_json::json!({"type": "object"})),
                    |_: Empty| async { Ok("wiped".to_string()) },
                )
                .risk(RiskClass::Delete),
            )
    }

    fn config() -> SessionConfig {
        SessionConfig::new("test", "sys").with_max_turns(5)
    }

    fn tool_results(session: &Session<'_>) -> Vec<String> {
        session
            .history()
            .turns()
            .iter()
            .filter_map(|t| t.tool_result().map(|r| r.payload.clone()))
            .collect()
    }

    #[tokio::test]
    async fn final_text_completes_the_session() {
        let transport = ScriptedTransport::new([
            ModelReply::call("c1", "echo", serde_json::json!({})),
            ModelReply::text("all done"),
        ]);
        let tools = tools();
        let mut session = Session::new(
            &transport,
            &tools,
            config(),
            PermissionState::permissive("/work"),
        );
        let outcome = session.run("do it").await;
        assert_eq!(outcome.status, SessionStatus::Completed);
        assert_eq!(outcome.text, "all done");
        assert_eq!(outcome.turns_used, 2);
        assert_eq!(session.history().len(), 4);
        assert_eq!(tool_results(&session), vec!["echoed"]);
        assert_eq!(session.state(), LoopState::Finished);
        // system + user, then system + user + calls + result
        assert_eq!(transport.message_counts(), vec![2, 4]);
    }

    #[tokio::test]
    async fn turn_limit_yields_partial() {
        let transport = ScriptedTransport::new([])
            .with_fallback(ModelReply::call("c", "echo", serde_json::json!({})));
        let tools = tools();
        let mut session = Session::new(
            &transport,
            &tools,
            config().with_max_turns(3),
            PermissionState::permissive("/work"),
        );
        let outcome = session.run("loop forever").await;
        assert_eq!(outcome.status, SessionStatus::Partial);
        assert_eq!(outcome.turns_used, 3);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let transport = ScriptedTransport::new([
            ModelReply::call("c1", "teleport", serde_json::json!({})),
            ModelReply::text("ok"),
        ]);
        let tools = tools();
        let mut session = Session::new(
            &transport,
            &tools,
            config(),
            PermissionState::permissive("/work"),
        );
        let outcome = session.run("go").await;
        assert!(outcome.is_complete());
        assert_eq!(
            tool_results(&session),
            vec!["Error [tool_not_found]: unknown tool 'teleport'"]
        );
    }

    #[tokio::test]
    async fn untrusted_root_without_approval_is_denied_but_session_continues() {
        let transport = ScriptedTransport::new([
            ModelReply::call("c1", "echo", serde_json::json!({})),
            ModelReply::text("gave up"),
        ]);
        let tools = tools();
        let permissions = PermissionState::new(AgentProfile::autonomous(), TrustStore::in_memory(), "/work");
        let mut session = Session::new(&transport, &tools, config(), permissions);
        let outcome = session.run("go").await;
        assert!(outcome.is_complete());
        let results = tool_results(&session);
        assert_eq!(results.len(), 1);
        assert!(results[0].starts_with("Error [permission_denied]"));
        assert_eq!(
            session.permissions().trust_status(),
            crate::agent::permission::TrustStatus::Untrusted
        );
    }

    #[tokio::test]
    async fn approval_handler_decides_confirmations() {
        let transport = ScriptedTransport::new([
            ModelReply::call("c1", "wipe", serde_json::json!({})),
            ModelReply::call("c2", "echo", serde_json::json!({})),
            ModelReply::text("done"),
        ]);
        let tools = tools();
        let asked = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&asked);
        let handler = FnEventHandler::new(move |event| match event {
            SessionEvent::TrustRequired { .. } => Some(EventResponse::Approve),
            SessionEvent::ApprovalRequired { name, .. } => {
                seen.lock().unwrap().push(name.to_string());
                Some(EventResponse::Deny("not today".into()))
            }
            _ => None,
        });
        let permissions =
            PermissionState::new(AgentProfile::default_profile(), TrustStore::in_memory(), "/work");
        let mut session =
            Session::new(&transport, &tools, config(), permissions).with_event_handler(&handler);
        session.run("go").await;

        assert_eq!(*asked.lock().unwrap(), vec!["wipe"]);
        let results = tool_results(&session);
        assert!(results[0].contains("not today"));
        assert_eq!(results[1], "echoed");
    }

    #[tokio::test]
    async fn inject_message_adds_a_user_turn() {
        let transport = ScriptedTransport::new([ModelReply::text("fine")]);
        let tools = tools();
        let handler = FnEventHandler::new(|event| match event {
            SessionEvent::TurnStart { turn: 1, .. } => {
                Some(EventResponse::InjectMessage("remember the tests".into()))
            }
            _ => None,
        });
        let mut session = Session::new(
            &transport,
            &tools,
            config(),
            PermissionState::permissive("/work"),
        )
        .with_event_handler(&handler);
        session.run("go").await;
        assert!(matches!(
            &session.history().get(1).unwrap().payload,
            TurnPayload::Text(t) if t == "remember the tests"
        ));
    }

    #[tokio::test]
    async fn raised_flag_cancels_before_the_first_turn() {
        let transport = ScriptedTransport::new([ModelReply::text("never")]);
        let tools = tools();
        let flag = CancelFlag::new();
        flag.cancel();
        let mut session = Session::new(
            &transport,
            &tools,
            config(),
            PermissionState::permissive("/work"),
        )
        .with_cancel_flag(flag);
        let outcome = session.run("go").await;
        assert_eq!(outcome.status, SessionStatus::Cancelled);
        assert_eq!(session.state(), LoopState::Cancelled);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let transport = ScriptedTransport::new([]);
        let tools = tools();
        let mut session = Session::new(
            &transport,
            &tools,
            config(),
            PermissionState::permissive("/work"),
        );
        let outcome = session.run("go").await;
        assert_eq!(outcome.status, SessionStatus::Failed);
        assert_eq!(outcome.error.map(|e| e.kind()), Some("transport"));
    }

    #[tokio::test]
    async fn compaction_runs_during_the_loop() {
        let big = "x".repeat(5_000);
        let tools = ToolSet::new().with(FnTool::new(
            ToolDef::new("dump", "dump", serde_json::json!({"type": "object"})),
            move |_: Empty| {
                let big = big.clone();
                async move { Ok(big) }
            },
        ));
        let transport = ScriptedTransport::new([])
            .with_fallback(ModelReply::call("c", "dump", serde_json::json!({})));
        let cfg = config().with_max_turns(6).with_compaction(
            CompactionConfig::default()
                .with_interval(4)
                .with_retention_window(2),
        );
        let mut session = Session::new(&transport, &tools, cfg, PermissionState::permissive("/work"));
        let outcome = session.run("go").await;
        assert!(outcome.compactions > 0);
        assert!(session.history().redacted_count() > 0);
    }

    #[tokio::test]
    async fn cancel_flag_wakes_waiters() {
        let flag = CancelFlag::new();
        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        flag.cancel();
        handle.await.unwrap();
        assert!(flag.is_cancelled());
    }
}
