//! The [`ModelTransport`] trait and a scripted implementation for tests.
//!
//! The session loop never talks HTTP directly. It hands a [`ModelRequest`]
//! to whatever transport it was built with and gets back a [`ModelReply`]:
//! either final text or a batch of tool calls.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::{EngineError, Message, ToolCall, ToolDef, UsageInfo};

/// Boxed future returned by [`ModelTransport::complete`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = crate::Result<ModelReply>> + Send + 'a>>;

/// One request to the model.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDef],
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What the model answered.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    /// Free text. Final answer when `tool_calls` is empty.
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    /// Convenience for a reply with a single tool call.
    pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(vec![ToolCall::function(id, name, arguments.to_string())])
    }

    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// Anything that can turn a conversation into the next model reply.
pub trait ModelTransport: Send + Sync {
    fn complete<'a>(&'a self, request: ModelRequest<'a>) -> TransportFuture<'a>;
}

impl<T: ModelTransport + ?Sized> ModelTransport for &T {
    fn complete<'a>(&'a self, request: ModelRequest<'a>) -> TransportFuture<'a> {
        (**self).complete(request)
    }
}

impl<T: ModelTransport + ?Sized> ModelTransport for std::sync::Arc<T> {
    fn complete<'a>(&'a self, request: ModelRequest<'a>) -> TransportFuture<'a> {
        (**self).complete(request)
    }
}

// ── ScriptedTransport ──────────────────────────────────────────────

/// Replays a fixed queue of replies. Used by tests and dry runs.
///
/// When the queue is empty the fallback reply (if any) is returned forever;
/// otherwise the transport fails with [`EngineError::Transport`].
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ModelReply>>,
    fallback: Option<ModelReply>,
    requests: AtomicU32,
    seen_messages: Mutex<Vec<usize>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: None,
            requests: AtomicU32::new(0),
            seen_messages: Mutex::new(Vec::new()),
        }
    }

    /// Reply returned once the script runs out.
    pub fn with_fallback(mut self, reply: ModelReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Message count of each request received, in order.
    pub fn message_counts(&self) -> Vec<usize> {
        self.seen_messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ModelTransport for ScriptedTransport {
    fn complete<'a>(&'a self, request: ModelRequest<'a>) -> TransportFuture<'a> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.seen_messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.messages.len());
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let reply = next.or_else(|| self.fallback.clone());
        Box::pin(async move {
            reply.ok_or_else(|| EngineError::Transport("scripted transport exhausted".into()))
        })
    }
}
