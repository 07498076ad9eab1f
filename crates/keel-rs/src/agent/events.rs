//! Events and handlers for a [`Session`](super::session::Session).
//!
//! The session reports its lifecycle through [`SessionEvent`] variants, from
//! turn start through tool execution, compaction and completion. Callers
//! implement [`EventHandler`] to observe them, and to answer the two events
//! that need a decision:
//!
//! - [`SessionEvent::TrustRequired`]: the workspace root has no trust record.
//! - [`SessionEvent::ApprovalRequired`]: the profile wants confirmation for
//!   this invocation.
//!
//! For both, `Some(EventResponse::Approve)` lets the invocation proceed;
//! anything else (including `None`) refuses it.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests; refuses every confirmation |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Compose several handlers in order |

use std::path::Path;

use tracing::{debug, info, trace, warn};

use crate::agent::permission::RiskClass;
use crate::agent::session::LoopState;
use crate::context::compaction::CompactionReport;
use crate::tools::core::truncate_chars;

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// A new agent turn is starting.
    TurnStart {
        turn: u32,
        max_turns: u32,
        history_turns: usize,
        history_chars: usize,
    },
    StateChanged { from: LoopState, to: LoopState },
    /// The model returned text (possibly alongside tool calls).
    Text(&'a str),
    ToolCallsReceived { turn: u32, count: usize },
    /// The workspace root is untrusted; approve to record trust.
    TrustRequired { root: &'a Path },
    /// The active profile requires confirmation for this invocation.
    ApprovalRequired {
        name: &'a str,
        arguments: &'a str,
        risk: RiskClass,
    },
    /// The gate refused an invocation.
    PermissionDenied { name: &'a str, reason: &'a str },
    ToolExecuting { name: &'a str, arguments: &'a str },
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a str,
        ok: bool,
    },
    /// A compaction sweep redacted at least one turn.
    Compacted(&'a CompactionReport),
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    DelegationStarted { task: &'a str, depth: u32, budget: u32 },
    DelegationFinished {
        completed: bool,
        turns_used: u32,
    },
    /// The model produced a final answer.
    Finished,
    TurnLimitReached { max_turns: u32 },
    Cancelled,
}

/// Response from a handler for events that take feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResponse {
    Approve,
    /// Refuse with a reason passed back to the model.
    Deny(String),
    /// Append a user message before the next model call (on `TurnStart`).
    InjectMessage(String),
}

/// Handler for session events.
///
/// # Example
///
/// ```ignore
/// struct ShellGate;
///
/// impl EventHandler for ShellGate {
///     fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
///         match event {
///             SessionEvent::ApprovalRequired { risk: RiskClass::Shell, .. } => {
///                 Some(EventResponse::Deny("no shell today".into()))
///             }
///             SessionEvent::ApprovalRequired { .. } | SessionEvent::TrustRequired { .. } => {
///                 Some(EventResponse::Approve)
///             }
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
        let _ = event;
        None
    }
}

impl<T: EventHandler + ?Sized> EventHandler for &T {
    fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
        (**self).on_event(event)
    }
}

impl<T: EventHandler + ?Sized> EventHandler for std::sync::Arc<T> {
    fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
        (**self).on_event(event)
    }
}

/// Ignores every event, so confirmations are refused.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let SessionEvent::Text(text) = event {
///         println!("{text}");
///     }
///     None
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&SessionEvent<'_>) -> Option<EventResponse> + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&SessionEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&SessionEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
        (self.0)(event)
    }
}

/// Dispatches each event to every inner handler in order and returns the
/// first non-`None` response.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(ConsoleApproval::new());
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
        let mut first = None;
        for handler in &self.handlers {
            let response = handler.on_event(event);
            if first.is_none() {
                first = response;
            }
        }
        first
    }
}

/// Logs events via `tracing`. Never answers confirmations.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
        match event {
            SessionEvent::TurnStart {
                turn,
                max_turns,
                history_turns,
                history_chars,
            } => {
                info!("[turn {turn}/{max_turns}] history: {history_turns} turns, {history_chars} chars");
            }
            SessionEvent::StateChanged { from, to } => trace!("state {from:?} -> {to:?}"),
            SessionEvent::Text(text) => debug!("Model text: {}", truncate_chars(text, 200)),
            SessionEvent::ToolCallsReceived { turn, count } => {
                debug!("{count} tool call(s) in turn {turn}");
            }
            SessionEvent::TrustRequired { root } => {
                info!("Trust required for {}", root.display());
            }
            SessionEvent::ApprovalRequired { name, risk, .. } => {
                info!("Approval required for {name} ({risk})");
            }
            SessionEvent::PermissionDenied { name, reason } => {
                warn!("Denied {name}: {reason}");
            }
            SessionEvent::ToolExecuting { name, .. } => debug!("Executing tool: {name}"),
            SessionEvent::ToolResult {
                name, result, ok, ..
            } => {
                debug!(
                    "Tool {name} {} ({} bytes)",
                    if *ok { "ok" } else { "failed" },
                    result.len()
                );
            }
            SessionEvent::Compacted(report) => {
                info!(
                    "Compacted {} tool result(s), freed {} chars",
                    report.redacted.len(),
                    report.freed_chars
                );
            }
            SessionEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}"),
            SessionEvent::DelegationStarted {
                task,
                depth,
                budget,
            } => info!(
                "Delegating at depth {depth} (budget {budget}): {}",
                truncate_chars(task, 120)
            ),
            SessionEvent::DelegationFinished {
                completed,
                turns_used,
            } => info!(
                "Delegation {} after {turns_used} turn(s)",
                if *completed { "completed" } else { "incomplete" }
            ),
            SessionEvent::Finished => info!("Session finished"),
            SessionEvent::TurnLimitReached { max_turns } => {
                info!("Session hit turn limit ({max_turns})");
            }
            SessionEvent::Cancelled => info!("Session cancelled"),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn approval() -> SessionEvent<'static> {
        SessionEvent::ApprovalRequired {
            name: "shell",
            arguments: "{}",
            risk: RiskClass::Shell,
        }
    }

    #[test]
    fn noop_and_logging_never_approve() {
        assert!(NoopHandler.on_event(&approval()).is_none());
        assert!(LoggingHandler.on_event(&approval()).is_none());
    }

    #[test]
    fn composite_returns_first_response_and_reaches_every_handler() {
        let seen = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&seen);
        let handler = CompositeEventHandler::new()
            .with(LoggingHandler)
            .with(FnEventHandler::new(|_| Some(EventResponse::Deny("first".into()))))
            .with(FnEventHandler::new(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
                Some(EventResponse::Approve)
            }));

        assert_eq!(
            handler.on_event(&approval()),
            Some(EventResponse::Deny("first".into()))
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_if_skips_handler() {
        let handler = CompositeEventHandler::new()
            .with_if(false, FnEventHandler::new(|_| Some(EventResponse::Approve)));
        assert!(handler.on_event(&SessionEvent::Finished).is_none());
    }

    #[test]
    fn references_and_arcs_forward() {
        let inner = FnEventHandler::new(|_| Some(EventResponse::Approve));
        assert_eq!((&inner).on_event(&approval()), Some(EventResponse::Approve));
        let shared: Arc<dyn EventHandler> = Arc::new(inner);
        assert_eq!(shared.on_event(&approval()), Some(EventResponse::Approve));
    }
}
