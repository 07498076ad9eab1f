//! Convenience re-exports for common `keel-rs` types.
//!
//! Meant to be glob-imported when wiring up a session:
//!
//! ```ignore
//! use keel_rs::prelude::*;
//! ```
//!
//! This pulls in what nearly every caller needs: the transport,
//! [`Session`] and its config, permissions and trust, event handlers, and
//! the tool registry. Lower-level pieces (strategies, compaction reports,
//! editor outcomes) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{EngineError, Message, Result, ToolCall, ToolDef, json_schema_for};

// ── Transport ───────────────────────────────────────────────────────
pub use crate::api::{ChatClient, ModelReply, ModelTransport, RetryConfig, ScriptedTransport};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AgentProfile, CancelFlag, CompositeEventHandler, DelegateTool, DelegationConfig, Dispatcher,
    EventHandler, EventResponse, FnEventHandler, LoggingHandler, NoopHandler, PermissionState,
    ProfileRegistry, RiskClass, Session, SessionConfig, SessionEvent, SessionOutcome,
    SessionStatus, SnapshotManager, Toggle, TrustStore,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{CompactionConfig, HistoryStore};

// ── Files and indexing ──────────────────────────────────────────────
pub use crate::edit::EditorConfig;
pub use crate::index::references::ScanConfig;

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::spec::ToolSpec;
pub use crate::tools::{FnTool, Tool, ToolFuture, ToolSet, Workspace, parse_tool_args};
