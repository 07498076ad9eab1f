//! Bounded-context session engine for tool-using coding agents.
//!
//! `keel-rs` runs an agent loop against a local codebase while keeping the
//! conversation fed back to the model bounded. Tool results accumulate in an
//! append-only [`HistoryStore`](context::history::HistoryStore); stale,
//! high-volume results are periodically replaced by small
//! [`MemoryMarker`](context::history::MemoryMarker)s; files are read and
//! edited by exact 1-based line ranges; and every invocation passes a
//! permission and trust gate before it runs.
//!
//! # Getting started
//!
//! ```ignore
//! use keel_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> keel_rs::Result<()> {
//!     let client = ChatClient::new(std::env::var("OPENROUTER_KEY").unwrap_or_default())?;
//!     let workspace = Arc::new(Workspace::open("/path/to/project")?);
//!     let tools = ToolSet::new().with_workspace_tools(&workspace);
//!
//!     let config = SessionConfig::new("anthropic/claude-sonnet-4", "You are a careful engineer.")
//!         .with_max_turns(40);
//!     let permissions = PermissionState::new(
//!         AgentProfile::default_profile(),
//!         TrustStore::in_memory(),
//!         workspace.root(),
//!     );
//!
//!     let outcome = Session::new(&client, &tools, config, permissions)
//!         .with_event_handler(&LoggingHandler)
//!         .run("Rename process_data to process_records")
//!         .await;
//!     println!("{:?}: {}", outcome.status, outcome.text);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Structural indexing:** [`index`] ([`Indexer`](index::Indexer),
//!   [`KnowledgeMap`](index::KnowledgeMap), [`KnowledgeCache`](index::cache::KnowledgeCache)).
//! - **Line-exact edits:** [`edit`] ([`LineEditor`](edit::LineEditor), [`PathLocks`](edit::PathLocks)).
//! - **Impact analysis:** [`index::references`].
//! - **Turn storage and compaction:** [`context::history`], [`context::compaction`].
//! - **Permissions and trust:** [`agent::permission`], [`agent::trust`].
//! - **The loop itself:** [`Session`](agent::session::Session), driven through a
//!   [`ModelTransport`](api::ModelTransport).
//! - **Sub-sessions:** [`agent::delegate`].
//! - **Save points:** [`agent::snapshot`].

pub mod agent;
pub mod api;
pub mod context;
pub mod edit;
pub mod error;
pub mod index;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::{EngineError, Result};

// Re-export schemars for downstream crates.
pub use schemars;

/// Default model for completions.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` for a tool argument type.
///
/// ```
/// use keel_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct ReadArgs {
///     path: String,
///     #[serde(default)]
///     start_line: Option<usize>,
/// }
///
/// let schema = json_schema_for::<ReadArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"path".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message sent to the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the wire conversation (OpenAI chat format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant message carrying tool calls and optional accompanying text.
    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Always `Function` in the chat API.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the model (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Build a function call with raw JSON arguments.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

/// Token usage reported by the provider.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}
