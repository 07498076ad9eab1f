//! Model transport layer: the seam between the session loop and a model.
//!
//! - [`transport`]: the [`ModelTransport`] trait the loop is written against,
//!   plus [`ScriptedTransport`] for deterministic tests.
//! - [`client`]: [`ChatClient`], an OpenAI/OpenRouter-compatible HTTP transport.
//! - [`retry`]: transient error detection with exponential backoff. Never
//!   retries 400/401 errors.
//! - [`tracing`]: session correlation IDs and cumulative token usage.

pub mod client;
pub mod retry;
pub mod tracing;
pub mod transport;

pub use client::{ChatClient, ChatRequest};
pub use retry::RetryConfig;
pub use self::tracing::{UsageTracker, generate_session_id};
pub use transport::{ModelReply, ModelRequest, ModelTransport, ScriptedTransport, TransportFuture};
