//! Typed error kinds shared by every engine component.
//!
//! Editor and scanner failures flow back to the model as failed tool
//! results (see [`EngineError::to_tool_payload`]); compaction failures are
//! logged and swallowed per candidate; permission denials end a single
//! invocation but never the session.

use std::path::Path;

/// Convenience alias used across the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Every failure the engine can report.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Editor range outside `[1, total]` or `end < start`.
    #[error("line range {start}-{end} is invalid for a file with {total} lines")]
    RangeInvalid {
        start: usize,
        end: usize,
        total: usize,
    },

    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Risk gate or trust gate refusal.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Another writer holds the per-path lock.
    #[error("'{0}' is locked by another writer; retry later")]
    LockContention(String),

    #[error("unknown tool '{0}'")]
    ToolNotFound(String),

    /// Non-fatal. A single compaction candidate was left unredacted.
    #[error("compaction skipped turn {turn}: {reason}")]
    CompactionSkipped { turn: u64, reason: String },

    /// Turn budget exhausted before the delegated task finished.
    #[error("delegation incomplete: turn budget exhausted after {turns_used}/{budget} turns")]
    DelegationIncomplete {
        turns_used: u32,
        budget: u32,
        partial: String,
    },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{what} exceeds the limit of {limit} bytes")]
    TooLarge { what: String, limit: usize },

    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },

    #[error("model transport: {0}")]
    Transport(String),

    #[error("failed to persist {what}: {message}")]
    Persist { what: String, message: String },

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Wrap an I/O error for `path`, mapping `NotFound` to [`EngineError::PathNotFound`].
    pub fn io(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        if err.kind() == std::io::ErrorKind::NotFound {
            EngineError::PathNotFound(path)
        } else {
            EngineError::Io {
                path,
                message: err.to_string(),
            }
        }
    }

    pub fn persist(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        EngineError::Persist {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// Stable snake_case tag for logs and tool results.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::RangeInvalid { .. } => "range_invalid",
            EngineError::PathNotFound(_) => "path_not_found",
            EngineError::PermissionDenied(_) => "permission_denied",
            EngineError::LockContention(_) => "lock_contention",
            EngineError::ToolNotFound(_) => "tool_not_found",
            EngineError::CompactionSkipped { .. } => "compaction_skipped",
            EngineError::DelegationIncomplete { .. } => "delegation_incomplete",
            EngineError::InvalidArguments(_) => "invalid_arguments",
            EngineError::TooLarge { .. } => "too_large",
            EngineError::Io { .. } => "io",
            EngineError::Transport(_) => "transport",
            EngineError::Persist { .. } => "persist",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Cancelled => "cancelled",
        }
    }

    /// Render the error as the payload of a failed tool result.
    ///
    /// Incomplete delegations carry their partial output so the model still
    /// sees what the subtask managed to do.
    pub fn to_tool_payload(&self) -> String {
        match self {
            EngineError::DelegationIncomplete { partial, .. } if !partial.is_empty() => {
                format!("Error [{}]: {self}\n{partial}", self.kind())
            }
            _ => format!("Error [{}]: {self}", self.kind()),
        }
    }
}
