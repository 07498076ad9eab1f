//! Delegated sub-sessions.
//!
//! A [`Dispatcher`] runs a subtask in a brand new [`Session`]: its own
//! history, its own permission profile, and a hard turn budget. Only a
//! condensed result travels back, so a delegation grows the parent's history
//! by exactly one tool-result turn however long the child ran.
//!
//! Children share the parent's transport, trust store, workspace (and so its
//! per-path locks) and cancel flag. Nothing else crosses the boundary.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::agent::config::{DelegationConfig, SessionConfig};
use crate::agent::events::{EventHandler, NoopHandler, SessionEvent};
use crate::agent::permission::{PermissionState, ProfileRegistry};
use crate::agent::session::{CancelFlag, Session, SessionStatus};
use crate::api::{ModelTransport, UsageTracker};
use crate::tools::core::{Tool, ToolFuture, ToolSet, parse_tool_args, truncate_chars};
use crate::tools::spec::ToolSpec;
use crate::tools::workspace::Workspace;
use crate::{EngineError, ToolDef};

fn child_system_prompt(budget: u32) -> String {
    format!(
        "You are a delegated sub-agent working on one subtask of a larger job. \
         You have at most {budget} turns. Use the tools to do the work, then answer \
         with a concise summary of what you found or changed. Do not ask \
         clarifying questions; do your best with the information given."
    )
}

// ── Outcome ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DelegationOutcome {
    /// The child produced a final answer within its budget.
    pub completed: bool,
    pub text: String,
    pub turns_used: u32,
    pub budget: u32,
    pub usage: UsageTracker,
}

impl DelegationOutcome {
    /// The single result handed back to the parent, cut to `max_chars`.
    ///
    /// An incomplete run becomes `DelegationIncomplete` carrying whatever
    /// the child managed, so the parent sees the partial status explicitly.
    pub fn into_result(self, max_chars: usize) -> crate::Result<String> {
        let text = if self.text.is_empty() {
            "(no output)".to_string()
        } else {
            truncate_chars(&self.text, max_chars)
        };
        if self.completed {
            Ok(format!(
                "[delegation completed in {} turn(s)]\n{text}",
                self.turns_used
            ))
        } else {
            Err(EngineError::DelegationIncomplete {
                turns_used: self.turns_used,
                budget: self.budget,
                partial: format!("[incomplete: partial result follows]\n{text}"),
            })
        }
    }
}

/// One entry for [`Dispatcher::delegate_many`].
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub task: String,
    pub profile: Option<String>,
    pub turn_budget: Option<u32>,
}

impl DelegationRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            profile: None,
            turn_budget: None,
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_turn_budget(mut self, budget: u32) -> Self {
        self.turn_budget = Some(budget);
        self
    }
}

// ── Dispatcher ────────────────────────────────────────────────────

/// Spawns child sessions one level below its owner.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn ModelTransport>,
    workspace: Arc<Workspace>,
    permissions: PermissionState,
    profiles: Arc<ProfileRegistry>,
    session: SessionConfig,
    config: DelegationConfig,
    /// Depth of the sessions this dispatcher creates (the root is 0).
    depth: u32,
    cancel: CancelFlag,
    events: Arc<dyn EventHandler>,
    usage: Arc<Mutex<UsageTracker>>,
}

impl Dispatcher {
    /// Dispatcher for a top-level session. `permissions` is the parent's
    /// state; children share its trust store but get their own profile.
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        workspace: Arc<Workspace>,
        permissions: &PermissionState,
        session: SessionConfig,
    ) -> Self {
        Self {
            transport,
            workspace,
            permissions: permissions.clone(),
            profiles: Arc::new(ProfileRegistry::builtin()),
            session,
            config: DelegationConfig::default(),
            depth: 1,
            cancel: CancelFlag::new(),
            events: Arc::new(NoopHandler),
            usage: Arc::new(Mutex::new(UsageTracker::default())),
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileRegistry) -> Self {
        self.profiles = Arc::new(profiles);
        self
    }

    pub fn with_config(mut self, config: DelegationConfig) -> Self {
        self.config = config;
        self
    }

    /// Share the parent's stop signal with every child.
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Handler for child sessions, including their confirmations.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = handler;
        self
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn config(&self) -> &DelegationConfig {
        &self.config
    }

    /// Tokens spent by every child so far, nested ones included.
    pub fn usage(&self) -> UsageTracker {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Dispatcher owned by a child running under `permissions`, so its own
    /// children are clamped to the child's profile.
    fn nested(&self, permissions: &PermissionState) -> Self {
        Self {
            depth: self.depth + 1,
            permissions: permissions.clone(),
            ..self.clone()
        }
    }

    /// Tools for a child session: the workspace tools, plus `delegate` when
    /// the child may itself delegate.
    fn child_tools(&self, permissions: &PermissionState) -> ToolSet {
        ToolSet::new()
            .with_workspace_tools(&self.workspace)
            .with_if(
                self.depth < self.config.max_depth,
                DelegateTool::new(Arc::new(self.nested(permissions))),
            )
    }

    /// Run `task` in a fresh sub-session.
    ///
    /// `profile` names the child's permission profile (the parent's when
    /// `None`), clamped so the child may never do more than the parent;
    /// `turn_budget` caps its turns (the configured default when
    /// `None`).
    pub async fn delegate(
        &self,
        task: &str,
        profile: Option<&str>,
        turn_budget: Option<u32>,
    ) -> crate::Result<DelegationOutcome> {
        if self.depth > self.config.max_depth {
            return Err(EngineError::PermissionDenied(format!(
                "delegation depth limit ({}) reached",
                self.config.max_depth
            )));
        }
        let budget = turn_budget.unwrap_or(self.config.default_turn_budget);
        if budget == 0 {
            return Err(EngineError::InvalidArguments(
                "turn_budget must be at least 1".into(),
            ));
        }
        let profile = match profile {
            Some(name) => self.profiles.get(name)?,
            None => self.permissions.profile().clone(),
        };

        let permissions = self.permissions.child(profile);

        self.events.on_event(&SessionEvent::DelegationStarted {
            task,
            depth: self.depth,
            budget,
        });
        info!(
            "Delegating at depth {} with profile '{}' and budget {budget}",
            self.depth,
            permissions.profile().name
        );

        let tools = self.child_tools(&permissions);
        let config = SessionConfig {
            system_prompt: child_system_prompt(budget),
            max_turns: budget,
            ..self.session.clone()
        };
        let mut session = Session::new(self.transport.as_ref(), &tools, config, permissions)
            .with_event_handler(self.events.as_ref())
            .with_cancel_flag(self.cancel.clone());
        let outcome = session.run(task).await;

        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .absorb(&outcome.usage);
        debug!(
            "Child session {} used {} turn(s), {} history turns stay behind",
            session.session_id(),
            outcome.turns_used,
            session.history().len()
        );

        let completed = match outcome.status {
            SessionStatus::Completed => true,
            SessionStatus::Partial => false,
            SessionStatus::Cancelled => return Err(EngineError::Cancelled),
            SessionStatus::Failed => {
                warn!("Delegated session failed: {}", outcome.text);
                return Err(outcome
                    .error
                    .unwrap_or_else(|| EngineError::Transport(outcome.text.clone())));
            }
        };
        self.events.on_event(&SessionEvent::DelegationFinished {
            completed,
            turns_used: outcome.turns_used,
        });

        Ok(DelegationOutcome {
            completed,
            text: outcome.text,
            turns_used: outcome.turns_used,
            budget,
            usage: outcome.usage,
        })
    }

    /// Run several subtasks concurrently. Results come back in request order.
    pub async fn delegate_many(
        &self,
        requests: Vec<DelegationRequest>,
    ) -> Vec<crate::Result<DelegationOutcome>> {
        join_all(requests.iter().map(|r| {
            self.delegate(&r.task, r.profile.as_deref(), r.turn_budget)
        }))
        .await
    }
}

// ── Tool ──────────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct DelegateArgs {
    /// Self-contained description of the subtask, including any context the
    /// sub-agent needs.
    pub task: String,
    /// Permission profile for the sub-agent: 'default', 'plan' (read-only),
    /// 'accept-edits', 'autonomous' or a custom name. Defaults to yours, and
    /// never allows more than yours.
    #[serde(default)]
    pub profile: Option<String>,
    /// Maximum turns the sub-agent may take.
    #[serde(default)]
    pub turn_budget: Option<u32>,
}

pub struct DelegateTool {
    dispatcher: Arc<Dispatcher>,
}

impl DelegateTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Tool for DelegateTool {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("delegate")
            .purpose("Hand a self-contained subtask to a sub-agent with its own context")
            .when_to_use(
                "For exploration or mechanical work whose intermediate output you do not need to see",
            )
            .when_not_to_use("For a single read or edit you can do directly")
            .parameters_for::<DelegateArgs>()
            .example(
                "delegate(task='List every caller of parse_config in src/', profile='plan', turn_budget=5)",
                "A short summary; incomplete runs are marked as such",
            )
            .output_format(
                "'[delegation completed in N turn(s)]' followed by the sub-agent's summary",
            )
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: DelegateArgs = parse_tool_args(&arguments)?;
            let max_chars = self.dispatcher.config().max_result_chars;
            self.dispatcher
                .delegate(&args.task, args.profile.as_deref(), args.turn_budget)
                .await?
                .into_result(max_chars)
        })
    }
}
