//! Turn storage and rolling compaction.
//!
//! - [`history`]: the append-only [`HistoryStore`] of user, assistant and
//!   tool turns, and the [`MemoryMarker`] that replaces a compacted result.
//! - [`compaction`]: the periodic sweep that redacts stale, oversized tool
//!   results outside the retention window.
//!
//! The session loop appends every turn to the store and runs the
//! [`CompactionEngine`] after each one; what the model sees on the next
//! request is [`HistoryStore::to_messages`].

pub mod compaction;
pub mod history;

pub use compaction::{CompactionConfig, CompactionEngine, CompactionReport, maybe_compact};
pub use history::{
    HistoryStore, MemoryMarker, ToolInvocation, ToolResult, ToolStatus, Turn, TurnPayload,
    TurnRole,
};
