//! Rolling compaction: replace stale, oversized tool results with markers.
//!
//! Tool results are the largest context consumer in an agent loop. A single
//! `read_lines` can inject tens of kilobytes that the model has long since
//! digested. Every `interval` turns the sweep walks the history oldest first
//! and swaps each eligible tool result for a [`MemoryMarker`] that names the
//! tool, its target and how much was removed. No model call is involved.
//!
//! A turn is eligible when it is a live (unredacted) tool result of at least
//! `size_threshold` chars, its tool is not protected, and it is older than
//! the retention window: `turn_counter - index > retention_window`.
//!
//! Failures are per candidate. A candidate that cannot be redacted is
//! logged, left untouched and the sweep moves on.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::history::{HistoryStore, MemoryMarker, Turn, TurnRole};
use crate::EngineError;
use crate::tools::core::truncate_chars;

/// Compaction schedule and thresholds.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Sweep when `turn_counter % interval == 0`. Zero disables sweeps.
    pub interval: u64,
    /// Number of most recent turns never touched.
    pub retention_window: u64,
    /// Minimum payload size (chars) worth compacting.
    pub size_threshold: usize,
    /// Tools whose results are never compacted.
    pub protected_tools: HashSet<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval: 10,
            retention_window: 6,
            size_threshold: 2_000,
            protected_tools: HashSet::from(["delegate".to_string()]),
        }
    }
}

impl CompactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retention_window(mut self, turns: u64) -> Self {
        self.retention_window = turns;
        self
    }

    pub fn with_size_threshold(mut self, chars: usize) -> Self {
        self.size_threshold = chars;
        self
    }

    /// Never compact results of `name`.
    pub fn protect_tool(mut self, name: impl Into<String>) -> Self {
        self.protected_tools.insert(name.into());
        self
    }

    pub fn is_active(&self, turn_counter: u64) -> bool {
        self.interval > 0 && turn_counter > 0 && turn_counter % self.interval == 0
    }

    /// Whether `turn` is far enough behind `turn_counter` to leave the window.
    pub fn outside_window(&self, index: u64, turn_counter: u64) -> bool {
        turn_counter
            .checked_sub(index)
            .is_some_and(|age| age > self.retention_window)
    }

    /// Full candidate test for one turn.
    pub fn is_eligible(&self, turn: &Turn, turn_counter: u64) -> bool {
        let Some(result) = turn.tool_result() else {
            return false;
        };
        turn.role == TurnRole::Tool
            && !turn.redacted
            && result.size >= self.size_threshold
            && !self.protected_tools.contains(&result.invocation.tool_name)
            && self.outside_window(turn.index, turn_counter)
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// The schedule allowed a sweep at this turn counter.
    pub active: bool,
    pub redacted: Vec<u64>,
    /// Candidates left unredacted, with the reason.
    pub skipped: Vec<(u64, String)>,
    pub freed_chars: usize,
}

impl CompactionReport {
    fn inactive() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.redacted.is_empty()
    }
}

/// Redact every eligible turn with index in `[from, to)`, oldest first.
fn sweep(history: &mut HistoryStore, from: u64, to: u64, turn_counter: u64, config: &CompactionConfig) -> CompactionReport {
    let mut report = CompactionReport {
        active: true,
        ..Default::default()
    };

    let candidates: Vec<(u64, MemoryMarker)> = history
        .slice(from, to)
        .iter()
        .filter(|t| config.is_eligible(t, turn_counter))
        .filter_map(|t| t.tool_result().map(|r| (t.index, MemoryMarker::for_result(r, t.index))))
        .collect();

    for (index, marker) in candidates {
        match redact_one(history, index, marker) {
            Ok(freed) => {
                debug!("compacted turn {index} ({freed} chars freed)");
                report.redacted.push(index);
                report.freed_chars += freed;
            }
            Err(e) => {
                warn!("{e}");
                let reason = match e {
                    EngineError::CompactionSkipped { reason, .. } => reason,
                    other => other.to_string(),
                };
                report.skipped.push((index, reason));
            }
        }
    }

    if !report.redacted.is_empty() {
        info!(
            "Compaction at turn {turn_counter}: {} result(s) redacted, {} chars freed",
            report.redacted.len(),
            report.freed_chars
        );
    }
    report
}

fn redact_one(history: &mut HistoryStore, index: u64, marker: MemoryMarker) -> crate::Result<usize> {
    let original = history.get(index).map_or(0, |t| t.size);
    if marker.render().chars().count() >= original {
        return Err(EngineError::CompactionSkipped {
            turn: index,
            reason: "marker would not be smaller than the payload".into(),
        });
    }
    history.redact(index, marker)
}

/// Stateless sweep over the whole history.
///
/// Does nothing unless `turn_counter` falls on the configured interval.
/// Running it twice in a row is a no-op the second time.
pub fn maybe_compact(history: &mut HistoryStore, turn_counter: u64, config: &CompactionConfig) -> CompactionReport {
    if !config.is_active(turn_counter) {
        return CompactionReport::inactive();
    }
    let end = history.next_index();
    sweep(history, 0, end, turn_counter, config)
}

/// Compaction with a visit cursor, so each turn is considered at most once
/// over the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct CompactionEngine {
    config: CompactionConfig,
    /// Turns below this index have been visited.
    cursor: u64,
    sweeps: u32,
}

impl CompactionEngine {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            cursor: 0,
            sweeps: 0,
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Number of active sweeps run so far.
    pub fn sweeps(&self) -> u32 {
        self.sweeps
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Call after every appended turn with the current turn counter.
    pub fn maybe_compact(&mut self, history: &mut HistoryStore, turn_counter: u64) -> CompactionReport {
        if !self.config.is_active(turn_counter) {
            return CompactionReport::inactive();
        }
        // Everything strictly older than the window is visited now.
        let horizon = turn_counter
            .saturating_sub(self.config.retention_window)
            .min(history.next_index());
        if horizon <= self.cursor {
            return CompactionReport {
                active: true,
                ..Default::default()
            };
        }
        let report = sweep(history, self.cursor, horizon, turn_counter, &self.config);
        self.cursor = horizon;
        self.sweeps += 1;
        report
    }
}

/// Short `key=value` summary of JSON arguments for markers.
pub fn summarize_args(arguments: &str, max_len: usize) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(arguments)
        && let Some(obj) = v.as_object()
    {
        let parts: Vec<String> = obj
            .iter()
            .take(3)
            .map(|(k, v)| {
                let val = match v {
                    serde_json::Value::String(s) => format!("\"{}\"", truncate_chars(s, 40)),
                    other => truncate_chars(&other.to_string(), 40),
                };
                format!("{k}={val}")
            })
            .collect();
        return truncate_chars(&parts.join(", "), max_len);
    }
    truncate_chars(arguments, max_len)
}
