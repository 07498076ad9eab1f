//! Console answers for trust and confirmation prompts.

use std::io::{BufRead, Write};
use std::path::Path;

use keel_rs::agent::{EventHandler, EventResponse, SessionEvent};
use keel_rs::tools::truncate_chars;
use tracing::debug;

/// Answers `TrustRequired` and `ApprovalRequired` from flags or by asking on
/// the terminal. Other events are left to the handlers next to it.
///
/// In non-interactive mode anything not pre-approved by a flag goes
/// unanswered, which the session treats as a refusal.
#[derive(Debug, Clone, Default)]
pub struct ConsoleApprovalHandler {
    interactive: bool,
    auto_confirm: bool,
    grant_trust: bool,
}

impl ConsoleApprovalHandler {
    pub fn new(interactive: bool) -> Self {
        Self {
            interactive,
            ..Default::default()
        }
    }

    /// Approve every confirmation without asking (`--yes`).
    pub fn with_auto_confirm(mut self, yes: bool) -> Self {
        self.auto_confirm = yes;
        self
    }

    /// Trust the workspace root without asking (`--trust`).
    pub fn with_trust(mut self, trust: bool) -> Self {
        self.grant_trust = trust;
        self
    }

    fn ask(&self, question: &str) -> Option<EventResponse> {
        if !self.interactive {
            debug!("Not asking in non-interactive mode: {question}");
            return None;
        }
        // Reading stdin blocks; keep other tasks on this runtime moving.
        let answer = tokio::task::block_in_place(|| read_answer(question))?;
        Some(parse_answer(&answer))
    }

    fn trust_question(root: &Path) -> String {
        format!(
            "Trust {}? The agent will be able to run tools in this directory.",
            root.display()
        )
    }
}

impl EventHandler for ConsoleApprovalHandler {
    fn on_event(&self, event: &SessionEvent<'_>) -> Option<EventResponse> {
        match event {
            SessionEvent::TrustRequired { root } => {
                if self.grant_trust {
                    return Some(EventResponse::Approve);
                }
                self.ask(&Self::trust_question(root))
            }
            SessionEvent::ApprovalRequired {
                name,
                arguments,
                risk,
            } => {
                if self.auto_confirm {
                    return Some(EventResponse::Approve);
                }
                self.ask(&format!(
                    "Allow {name} ({risk}) with {}?",
                    truncate_chars(arguments, 200)
                ))
            }
            _ => None,
        }
    }
}

fn read_answer(question: &str) -> Option<String> {
    let mut stderr = std::io::stderr().lock();
    write!(stderr, "{question} [y/N or a reason to refuse] ").ok()?;
    stderr.flush().ok()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).ok()?;
    Some(line)
}

/// `y`/`yes` approves; an empty answer or `n`/`no` refuses; any other text
/// refuses and is passed to the model as the reason.
pub fn parse_answer(answer: &str) -> EventResponse {
    let answer = answer.trim();
    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => EventResponse::Approve,
        "" | "n" | "no" => EventResponse::Deny("declined by the user".into()),
        _ => EventResponse::Deny(answer.to_string()),
    }
}
