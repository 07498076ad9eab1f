//! Correlation IDs and token accounting for sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::UsageInfo;

/// Generate a unique ID for a session. Sub-sessions get their own.
pub fn generate_session_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates calls within the same nanosecond.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ks-{ts:x}-{count:04x}")
}

/// Cumulative token usage for a session (including its delegations).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UsageTracker {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u32,
}

impl UsageTracker {
    pub fn record(&mut self, usage: Option<&UsageInfo>) {
        self.requests += 1;
        if let Some(u) = usage {
            self.prompt_tokens += u.prompt_tokens.unwrap_or(0) as u64;
            self.completion_tokens += u.completion_tokens.unwrap_or(0) as u64;
        }
    }

    /// Fold a child session's usage into this one.
    pub fn absorb(&mut self, other: &UsageTracker) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.requests += other.requests;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn summary(&self) -> String {
        format!(
            "{} request(s), tokens: {} prompt + {} completion = {} total",
            self.requests,
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens(),
        )
    }
}
