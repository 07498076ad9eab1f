//! Configuration types for a [`Session`](super::session::Session).
//!
//! Everything is session-scoped: a config struct is built once, handed to
//! the session, and never mutated behind its back. Optional modules are
//! wrapped in [`Toggle`].
//!
//! ```ignore
//! let config = SessionConfig::new("anthropic/claude-sonnet-4", "You are a careful engineer.")
//!     .with_max_turns(60)
//!     .with_compaction(CompactionConfig::default().with_interval(8));
//!
//! // Disable compaction entirely:
//! let config = SessionConfig {
//!     compaction: Toggle::disabled(),
//!     ..SessionConfig::new(DEFAULT_MODEL, "You are helpful.")
//! };
//! ```

use crate::DEFAULT_MODEL;
use crate::context::compaction::CompactionConfig;

// ── Generic toggle ────────────────────────────────────────────────

/// Generic enabled/disabled wrapper for module configurations.
///
/// When `enabled` is `false` the module is skipped regardless of the inner
/// config values.
#[derive(Debug, Clone)]
pub struct Toggle<T: Default> {
    pub enabled: bool,
    pub config: T,
}

impl<T: Default> Toggle<T> {
    pub fn enabled(config: T) -> Self {
        Self {
            enabled: true,
            config,
        }
    }

    /// A disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    /// The inner config when enabled.
    pub fn active(&self) -> Option<&T> {
        self.enabled.then_some(&self.config)
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self::enabled(T::default())
    }
}

// ── Delegation ────────────────────────────────────────────────────

/// Limits for delegated sub-sessions.
#[derive(Debug, Clone)]
pub struct DelegationConfig {
    /// Turn budget when the caller does not give one.
    pub default_turn_budget: u32,
    /// Nesting limit. The top-level session is depth 0; a session at
    /// `max_depth` cannot delegate further.
    pub max_depth: u32,
    /// The condensed result appended to the parent is cut to this many chars.
    pub max_result_chars: usize,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            default_turn_budget: 10,
            max_depth: 2,
            max_result_chars: 4_000,
        }
    }
}

impl DelegationConfig {
    pub fn with_default_turn_budget(mut self, budget: u32) -> Self {
        self.default_turn_budget = budget;
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_result_chars(mut self, chars: usize) -> Self {
        self.max_result_chars = chars;
        self
    }
}

// ── Session ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model identifier (e.g. `"anthropic/claude-sonnet-4"`).
    pub model: String,
    pub system_prompt: String,
    /// Hard cap on agent turns (model round-trips).
    pub max_turns: u32,
    /// Maximum tokens per model response.
    pub max_tokens: u32,
    pub temperature: f32,
    /// Rolling compaction of stale tool results. Enabled by default.
    pub compaction: Toggle<CompactionConfig>,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction = Toggle::enabled(config);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: String::new(),
            max_turns: 40,
            max_tokens: 4_096,
            temperature: 0.2,
            compaction: Toggle::default(),
        }
    }
}
