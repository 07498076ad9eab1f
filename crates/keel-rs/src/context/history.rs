//! Append-only turn storage.
//!
//! Every user message, model reply and tool result becomes a [`Turn`] with a
//! strictly increasing index. Turns never change after they are appended,
//! with one exception: compaction may swap a tool result's payload for a
//! [`MemoryMarker`]. That transition is one-way and the original payload is
//! dropped, not kept aside. Re-acquiring the content means re-invoking the
//! tool that produced it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::permission::RiskClass;
use crate::context::compaction::summarize_args;
use crate::tools::core::truncate_chars;
use crate::{EngineError, Message, ToolCall};

/// Prefix of every rendered marker.
pub const MARKER_PREFIX: &str = "[Compacted:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// A tool call as the engine sees it once resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    /// Raw JSON arguments.
    pub arguments: String,
    /// Workdir-relative paths the call targets, if file-scoped.
    pub target_paths: Vec<String>,
    pub risk_class: RiskClass,
}

impl ToolInvocation {
    pub fn from_call(call: &ToolCall, risk_class: RiskClass) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
            target_paths: extract_paths(&call.function.arguments),
            risk_class,
        }
    }

    /// First target path, else the `symbol` argument.
    pub fn primary_target(&self) -> Option<String> {
        self.target_paths.first().cloned().or_else(|| {
            serde_json::from_str::<serde_json::Value>(&self.arguments)
                .ok()?
                .get("symbol")?
                .as_str()
                .map(str::to_string)
        })
    }

    pub fn is_mutating(&self) -> bool {
        self.risk_class.is_mutating()
    }
}

/// File paths mentioned in JSON tool arguments.
pub fn extract_paths(arguments: &str) -> Vec<String> {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(arguments) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for key in ["path", "file_path", "source", "destination"] {
        if let Some(p) = v.get(key).and_then(|p| p.as_str())
            && !p.is_empty()
        {
            out.push(p.to_string());
        }
    }
    if let Some(arr) = v.get("paths").and_then(|p| p.as_array()) {
        out.extend(arr.iter().filter_map(|p| p.as_str()).map(str::to_string));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub payload: String,
    pub invocation: ToolInvocation,
    /// Payload size in chars.
    pub size: usize,
}

impl ToolResult {
    pub fn ok(invocation: ToolInvocation, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self {
            status: ToolStatus::Ok,
            size: payload.chars().count(),
            payload,
            invocation,
        }
    }

    /// A failed result whose payload names the error kind.
    pub fn error(invocation: ToolInvocation, err: &EngineError) -> Self {
        let payload = err.to_tool_payload();
        Self {
            status: ToolStatus::Error,
            size: payload.chars().count(),
            payload,
            invocation,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }
}

/// What is left of a tool result after compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryMarker {
    pub call_id: String,
    pub tool_name: String,
    pub args_summary: String,
    /// Char count of the discarded payload.
    pub original_size: usize,
    /// Primary path or symbol the call touched.
    pub primary_target: Option<String>,
    /// Index of the turn this marker replaced.
    pub turn_index: u64,
}

impl MemoryMarker {
    pub fn for_result(result: &ToolResult, turn_index: u64) -> Self {
        Self {
            call_id: result.invocation.call_id.clone(),
            tool_name: result.invocation.tool_name.clone(),
            args_summary: summarize_args(&result.invocation.arguments, 80),
            original_size: result.size,
            primary_target: result.invocation.primary_target(),
            turn_index,
        }
    }

    pub fn render(&self) -> String {
        let target = self
            .primary_target
            .as_deref()
            .map(|t| format!(" on {}", truncate_chars(t, 120)))
            .unwrap_or_default();
        format!(
            "{MARKER_PREFIX} {}({}){target}, turn {}, {} chars removed. Re-run the tool to see this content again.]",
            self.tool_name, self.args_summary, self.turn_index, self.original_size,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPayload {
    Text(String),
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
    ToolResult(ToolResult),
    Marker(MemoryMarker),
}

impl TurnPayload {
    fn size(&self) -> usize {
        match self {
            TurnPayload::Text(t) => t.chars().count(),
            TurnPayload::ToolCalls { text, calls } => {
                text.as_ref().map_or(0, |t| t.chars().count())
                    + calls
                        .iter()
                        .map(|c| c.function.name.len() + c.function.arguments.chars().count())
                        .sum::<usize>()
            }
            TurnPayload::ToolResult(r) => r.size,
            TurnPayload::Marker(m) => m.render().chars().count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub index: u64,
    pub role: TurnRole,
    pub payload: TurnPayload,
    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub redacted: bool,
}

impl Turn {
    pub fn tool_result(&self) -> Option<&ToolResult> {
        match &self.payload {
            TurnPayload::ToolResult(r) => Some(r),
            _ => None,
        }
    }

    pub fn marker(&self) -> Option<&MemoryMarker> {
        match &self.payload {
            TurnPayload::Marker(m) => Some(m),
            _ => None,
        }
    }

    /// Name of the tool that produced this turn, live or compacted.
    pub fn tool_name(&self) -> Option<&str> {
        match &self.payload {
            TurnPayload::ToolResult(r) => Some(&r.invocation.tool_name),
            TurnPayload::Marker(m) => Some(&m.tool_name),
            _ => None,
        }
    }

    fn to_message(&self) -> Message {
        match &self.payload {
            TurnPayload::Text(t) => match self.role {
                TurnRole::Assistant => Message::assistant_text(t.clone()),
                _ => Message::user(t.clone()),
            },
            TurnPayload::ToolCalls { text, calls } => {
                Message::assistant_tool_calls(text.clone(), calls.clone())
            }
            TurnPayload::ToolResult(r) => {
                Message::tool_result(r.invocation.call_id.clone(), r.payload.clone())
            }
            TurnPayload::Marker(m) => Message::tool_result(m.call_id.clone(), m.render()),
        }
    }
}

// ── HistoryStore ───────────────────────────────────────────────────

/// Ordered, append-only sequence of turns.
#[derive(Debug, Default, Clone)]
pub struct HistoryStore {
    turns: Vec<Turn>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return its index.
    pub fn append(&mut self, role: TurnRole, payload: TurnPayload) -> u64 {
        let index = self.next_index();
        self.turns.push(Turn {
            index,
            role,
            size: payload.size(),
            payload,
            created_at: Utc::now(),
            redacted: false,
        });
        index
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> u64 {
        self.append(TurnRole::User, TurnPayload::Text(text.into()))
    }

    pub fn append_assistant(&mut self, text: Option<String>, calls: Vec<ToolCall>) -> u64 {
        let payload = if calls.is_empty() {
            TurnPayload::Text(text.unwrap_or_default())
        } else {
            TurnPayload::ToolCalls { text, calls }
        };
        self.append(TurnRole::Assistant, payload)
    }

    pub fn append_tool_result(&mut self, result: ToolResult) -> u64 {
        self.append(TurnRole::Tool, TurnPayload::ToolResult(result))
    }

    /// Index the next appended turn will receive.
    pub fn next_index(&self) -> u64 {
        self.turns.len() as u64
    }

    /// The turn at `index`. Redacted turns carry their marker, not the payload.
    pub fn get(&self, index: u64) -> Option<&Turn> {
        usize::try_from(index).ok().and_then(|i| self.turns.get(i))
    }

    /// Turns with `from <= index < to`, clamped to what exists.
    pub fn slice(&self, from: u64, to: u64) -> &[Turn] {
        let len = self.turns.len();
        let lo = usize::try_from(from).unwrap_or(len).min(len);
        let hi = usize::try_from(to).unwrap_or(len).min(len);
        if lo >= hi {
            return &[];
        }
        &self.turns[lo..hi]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Sum of turn sizes in chars.
    pub fn total_size(&self) -> usize {
        self.turns.iter().map(|t| t.size).sum()
    }

    pub fn redacted_count(&self) -> usize {
        self.turns.iter().filter(|t| t.redacted).count()
    }

    /// Replace a tool result's payload with `marker`.
    ///
    /// Returns the chars freed, or `Ok(0)` if the turn was already redacted.
    pub(crate) fn redact(&mut self, index: u64, marker: MemoryMarker) -> crate::Result<usize> {
        let skipped = |reason: &str| EngineError::CompactionSkipped {
            turn: index,
            reason: reason.to_string(),
        };
        if marker.turn_index > index {
            return Err(skipped("marker references a later turn"));
        }
        let turn = usize::try_from(index)
            .ok()
            .and_then(|i| self.turns.get_mut(i))
            .ok_or_else(|| skipped("no such turn"))?;
        if turn.redacted {
            return Ok(0);
        }
        if !matches!(turn.payload, TurnPayload::ToolResult(_)) {
            return Err(skipped("not a tool result"));
        }
        let payload = TurnPayload::Marker(marker);
        let new_size = payload.size();
        let freed = turn.size.saturating_sub(new_size);
        turn.payload = payload;
        turn.size = new_size;
        turn.redacted = true;
        Ok(freed)
    }

    /// The sequence as chat messages, markers in place of redacted results.
    pub fn to_messages(&self) -> Vec<Message> {
        self.turns.iter().map(Turn::to_message).collect()
    }
}
