//! Terminal coding agent built on keel-rs.
//!
//! `keel-code` wires the keel-rs session engine to a command line: coding
//! defaults ([`CodeConfig`]), a console handler for trust and confirmation
//! prompts ([`ConsoleApprovalHandler`]) and logging setup.
//!
//! # Library usage
//!
//! ```ignore
//! use keel_code::CodeConfig;
//!
//! let config = CodeConfig { workdir: "/path/to/project".into(), ..Default::default() };
//! let workspace = config.open_workspace()?;
//! let profiles = config.load_profiles()?;
//! let permissions = config.build_permissions(&profiles, workspace.root())?;
//! ```
//!
//! # Binary
//!
//! ```sh
//! # Ask before every write, trust the project up front
//! keel --workdir /path/to/project --trust --prompt "Rename process_data to process_records"
//!
//! # CI: no prompts, edits allowed, shell still refused
//! keel --non-interactive --profile accept-edits --prompt "Fix the failing doc test"
//! ```
//!
//! Exit codes: `0` completed, `2` turn limit reached, `130` cancelled, `1`
//! anything else.

pub mod approval;
pub mod config;
pub mod logging;
pub mod prompt;

use keel_rs::agent::{SessionOutcome, SessionStatus};
use serde::Serialize;

pub use approval::ConsoleApprovalHandler;
pub use config::CodeConfig;
pub use logging::init_logging;
pub use prompt::coding_system_prompt;

/// Process exit code for a finished session.
pub fn exit_code(status: SessionStatus) -> u8 {
    match status {
        SessionStatus::Completed => 0,
        SessionStatus::Partial => 2,
        SessionStatus::Cancelled => 130,
        SessionStatus::Failed => 1,
    }
}

/// Machine-readable result printed with `--json`.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub status: SessionStatus,
    pub turns_used: u32,
    pub compactions: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub text: &'a str,
}

impl<'a> From<&'a SessionOutcome> for RunSummary<'a> {
    fn from(outcome: &'a SessionOutcome) -> Self {
        Self {
            status: outcome.status,
            turns_used: outcome.turns_used,
            compactions: outcome.compactions,
            prompt_tokens: outcome.usage.prompt_tokens,
            completion_tokens: outcome.usage.completion_tokens,
            text: &outcome.text,
        }
    }
}
