//! Risk classes, agent profiles, and the permission gate.
//!
//! Every tool declares a [`RiskClass`]. An [`AgentProfile`] maps each class to
//! a [`Decision`]. Before an invocation runs, [`decide`] combines the active
//! profile, the invocation's risk class, and the workspace root's
//! [`TrustStatus`] into a [`GateDecision`]:
//!
//! | trust | profile says | gate |
//! |-------|--------------|------|
//! | untrusted | anything | [`GateDecision::NeedsTrust`] |
//! | trusted | `auto` | [`GateDecision::Proceed`] |
//! | trusted | `confirm` | [`GateDecision::NeedsConfirmation`] |
//! | trusted | `deny` | [`GateDecision::Denied`] |
//!
//! The decision is recomputed for every invocation, so switching the active
//! profile mid-session takes effect on the next call.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::trust::{TrustStore, save_json_atomic};
use crate::EngineError;

// ── Risk classes ───────────────────────────────────────────────────

/// How much damage a tool invocation can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    ReadOnly,
    Write,
    Delete,
    Shell,
}

impl RiskClass {
    pub const ALL: [RiskClass; 4] = [
        RiskClass::ReadOnly,
        RiskClass::Write,
        RiskClass::Delete,
        RiskClass::Shell,
    ];

    /// Whether invocations of this class can change the file system.
    pub fn is_mutating(self) -> bool {
        !matches!(self, RiskClass::ReadOnly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskClass::ReadOnly => "read_only",
            RiskClass::Write => "write",
            RiskClass::Delete => "delete",
            RiskClass::Shell => "shell",
        }
    }

    /// Parse the snake_case name used in `profiles.json`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a profile requires before an invocation of a given risk class runs.
///
/// Ordered from most to least permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Auto,
    Confirm,
    Deny,
}

// ── Profiles ───────────────────────────────────────────────────────

/// A named mapping from risk class to required action.
///
/// Risk classes missing from `rules` require confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub name: String,
    pub rules: BTreeMap<RiskClass, Decision>,
}

impl AgentProfile {
    pub const DEFAULT: &'static str = "default";
    pub const PLAN: &'static str = "plan";
    pub const ACCEPT_EDITS: &'static str = "accept-edits";
    pub const AUTONOMOUS: &'static str = "autonomous";

    /// A profile with no rules; every class requires confirmation.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: BTreeMap::new(),
        }
    }

    pub fn with_rule(mut self, risk: RiskClass, decision: Decision) -> Self {
        self.rules.insert(risk, decision);
        self
    }

    pub fn decision_for(&self, risk: RiskClass) -> Decision {
        self.rules.get(&risk).copied().unwrap_or(Decision::Confirm)
    }

    /// This profile, tightened so no risk class is more permissive than in
    /// `ceiling`.
    pub fn clamped_to(&self, ceiling: &AgentProfile) -> Self {
        let mut clamped = Self::new(self.name.clone());
        let mut tightened = false;
        for risk in RiskClass::ALL {
            let own = self.decision_for(risk);
            let decision = own.max(ceiling.decision_for(risk));
            tightened |= decision != own;
            clamped.rules.insert(risk, decision);
        }
        if tightened {
            clamped.name = format!("{} (within {})", self.name, ceiling.name);
        }
        clamped
    }

    /// Reads run automatically; every mutation asks first.
    pub fn default_profile() -> Self {
        Self::new(Self::DEFAULT)
            .with_rule(RiskClass::ReadOnly, Decision::Auto)
            .with_rule(RiskClass::Write, Decision::Confirm)
            .with_rule(RiskClass::Delete, Decision::Confirm)
            .with_rule(RiskClass::Shell, Decision::Confirm)
    }

    /// Read-only planning: mutations are refused outright.
    pub fn plan() -> Self {
        Self::new(Self::PLAN)
            .with_rule(RiskClass::ReadOnly, Decision::Auto)
            .with_rule(RiskClass::Write, Decision::Deny)
            .with_rule(RiskClass::Delete, Decision::Deny)
            .with_rule(RiskClass::Shell, Decision::Deny)
    }

    /// Edits go through; deletes and shell commands are confirmed.
    pub fn accept_edits() -> Self {
        Self::new(Self::ACCEPT_EDITS)
            .with_rule(RiskClass::ReadOnly, Decision::Auto)
            .with_rule(RiskClass::Write, Decision::Auto)
            .with_rule(RiskClass::Delete, Decision::Confirm)
            .with_rule(RiskClass::Shell, Decision::Confirm)
    }

    pub fn autonomous() -> Self {
        let mut profile = Self::new(Self::AUTONOMOUS);
        for risk in RiskClass::ALL {
            profile.rules.insert(risk, Decision::Auto);
        }
        profile
    }

    /// Look up one of the four built-in profiles by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            Self::DEFAULT => Some(Self::default_profile()),
            Self::PLAN => Some(Self::plan()),
            Self::ACCEPT_EDITS => Some(Self::accept_edits()),
            Self::AUTONOMOUS => Some(Self::autonomous()),
            _ => None,
        }
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self::default_profile()
    }
}

/// On-disk shape of `profiles.json`: profile name → risk class → decision.
type ProfileFile = BTreeMap<String, BTreeMap<String, Decision>>;

/// Built-in profiles plus custom ones loaded from `profiles.json`.
///
/// Custom profiles with a built-in name replace the built-in.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, AgentProfile>,
}

impl ProfileRegistry {
    /// The four built-in profiles.
    pub fn builtin() -> Self {
        let profiles = [
            AgentProfile::default_profile(),
            AgentProfile::plan(),
            AgentProfile::accept_edits(),
            AgentProfile::autonomous(),
        ]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();
        Self { profiles }
    }

    /// Load custom profiles from `path` on top of the built-ins.
    ///
    /// A missing file yields just the built-ins. Unrecognised risk class
    /// names are skipped with a warning.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let mut registry = Self::builtin();
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No profiles file at {}", path.display());
                return Ok(registry);
            }
            Err(e) => return Err(EngineError::io(path, e)),
        };
        let file: ProfileFile = serde_json::from_str(&data)
            .map_err(|e| EngineError::persist("profiles", e.to_string()))?;
        for (name, rules) in file {
            let mut profile = AgentProfile::new(&name);
            for (risk, decision) in rules {
                match RiskClass::parse(&risk) {
                    Some(r) => {
                        profile.rules.insert(r, decision);
                    }
                    None => warn!("Profile '{name}': ignoring unknown risk class '{risk}'"),
                }
            }
            registry.insert(profile);
        }
        debug!(
            "Loaded {} profile(s) from {}",
            registry.profiles.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn insert(&mut self, profile: AgentProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> crate::Result<AgentProfile> {
        self.profiles.get(name).cloned().ok_or_else(|| {
            EngineError::InvalidArguments(format!(
                "unknown profile '{name}' (available: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Write every profile back to `path`.
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let file: ProfileFile = self
            .profiles
            .values()
            .map(|p| {
                let rules = p
                    .rules
                    .iter()
                    .map(|(r, d)| (r.as_str().to_string(), *d))
                    .collect();
                (p.name.clone(), rules)
            })
            .collect();
        save_json_atomic(path, &file)
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ── The gate ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustStatus {
    Trusted,
    Untrusted,
}

/// Outcome of evaluating one invocation against the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// The workspace root has no trust record; ask before anything runs.
    NeedsTrust,
    NeedsConfirmation,
    Denied(String),
}

/// Pure gate function. The trust check comes first.
pub fn decide(profile: &AgentProfile, risk: RiskClass, trust: TrustStatus) -> GateDecision {
    if trust == TrustStatus::Untrusted {
        return GateDecision::NeedsTrust;
    }
    match profile.decision_for(risk) {
        Decision::Auto => GateDecision::Proceed,
        Decision::Confirm => GateDecision::NeedsConfirmation,
        Decision::Deny => GateDecision::Denied(format!(
            "profile '{}' does not allow {risk} actions",
            profile.name
        )),
    }
}

/// Session-scoped permission state: the active profile plus the trust store
/// for one workspace root.
///
/// The trust store is shared with delegated child sessions; the profile is
/// not.
#[derive(Debug, Clone)]
pub struct PermissionState {
    profile: AgentProfile,
    trust: Arc<Mutex<TrustStore>>,
    root: PathBuf,
}

impl PermissionState {
    pub fn new(profile: AgentProfile, trust: TrustStore, root: impl Into<PathBuf>) -> Self {
        Self {
            profile,
            trust: Arc::new(Mutex::new(trust)),
            root: root.into(),
        }
    }

    /// Autonomous profile over an already-trusted in-memory store. Handy for
    /// tests and dry runs.
    pub fn permissive(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut trust = TrustStore::in_memory();
        trust.grant(&root);
        Self::new(AgentProfile::autonomous(), trust, root)
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn set_profile(&mut self, profile: AgentProfile) {
        info!("Switching profile: {} -> {}", self.profile.name, profile.name);
        self.profile = profile;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trust_status(&self) -> TrustStatus {
        let store = self.trust.lock().unwrap_or_else(|e| e.into_inner());
        if store.is_trusted(&self.root) {
            TrustStatus::Trusted
        } else {
            TrustStatus::Untrusted
        }
    }

    pub fn evaluate(&self, risk: RiskClass) -> GateDecision {
        decide(&self.profile, risk, self.trust_status())
    }

    /// Record trust for the root and persist the store.
    pub fn grant_trust(&self) -> crate::Result<()> {
        let mut store = self.trust.lock().unwrap_or_else(|e| e.into_inner());
        store.grant(&self.root);
        store.save()
    }

    /// Fresh state for a delegated sub-session sharing this trust store.
    ///
    /// The child never gets more than this session may do: `profile` is
    /// clamped to the current one.
    pub fn child(&self, profile: AgentProfile) -> Self {
        let profile = profile.clamped_to(&self.profile);
        if profile.name != self.profile.name {
            debug!("Child profile: {}", profile.name);
        }
        Self {
            profile,
            trust: Arc::clone(&self.trust),
            root: self.root.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_root_needs_trust_before_anything() {
        for risk in RiskClass::ALL {
            assert_eq!(
                decide(&AgentProfile::autonomous(), risk, TrustStatus::Untrusted),
                GateDecision::NeedsTrust
            );
        }
    }

    #[test]
    fn builtin_profiles_match_their_descriptions() {
        let t = TrustStatus::Trusted;
        let default = AgentProfile::default_profile();
        assert_eq!(decide(&default, RiskClass::ReadOnly, t), GateDecision::Proceed);
        assert_eq!(
            decide(&default, RiskClass::Write, t),
            GateDecision::NeedsConfirmation
        );

        let plan = AgentProfile::plan();
        assert!(matches!(
            decide(&plan, RiskClass::Delete, t),
            GateDecision::Denied(_)
        ));

        let edits = AgentProfile::accept_edits();
        assert_eq!(decide(&edits, RiskClass::Write, t), GateDecision::Proceed);
        assert_eq!(
            decide(&edits, RiskClass::Shell, t),
            GateDecision::NeedsConfirmation
        );

        let auto = AgentProfile::autonomous();
        assert!(
            RiskClass::ALL
                .iter()
                .all(|r| decide(&auto, *r, t) == GateDecision::Proceed)
        );
    }

    #[test]
    fn missing_rule_requires_confirmation() {
        let p = AgentProfile::new("custom").with_rule(RiskClass::ReadOnly, Decision::Auto);
        assert_eq!(p.decision_for(RiskClass::Shell), Decision::Confirm);
    }

    #[test]
    fn profile_switch_applies_to_next_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PermissionState::permissive(dir.path());
        assert_eq!(state.evaluate(RiskClass::Write), GateDecision::Proceed);
        state.set_profile(AgentProfile::plan());
        assert!(matches!(
            state.evaluate(RiskClass::Write),
            GateDecision::Denied(_)
        ));
    }

    #[test]
    fn child_shares_trust_but_not_profile() {
        let dir = tempfile::tempdir().unwrap();
        let parent = PermissionState::new(
            AgentProfile::autonomous(),
            TrustStore::in_memory(),
            dir.path(),
        );
        let child = parent.child(AgentProfile::plan());
        assert_eq!(child.trust_status(), TrustStatus::Untrusted);
        parent.grant_trust().unwrap();
        assert_eq!(child.trust_status(), TrustStatus::Trusted);
        assert_eq!(child.profile().name, "plan");
    }

    #[test]
    fn child_profile_never_exceeds_the_parent() {
        let mut parent = PermissionState::permissive("/work");
        parent.set_profile(AgentProfile::plan());

        let child = parent.child(AgentProfile::autonomous());
        for risk in [RiskClass::Write, RiskClass::Delete, RiskClass::Shell] {
            assert!(matches!(child.evaluate(risk), GateDecision::Denied(_)));
        }
        assert_eq!(child.evaluate(RiskClass::ReadOnly), GateDecision::Proceed);
        assert_eq!(child.profile().name, "autonomous (within plan)");

        // Stricter requests are kept as asked.
        let edits = PermissionState::permissive("/work").child(AgentProfile::accept_edits());
        assert_eq!(edits.profile(), &AgentProfile::accept_edits());

        // Clamping carries through nested children.
        let grandchild = child.child(AgentProfile::default_profile());
        assert!(matches!(grandchild.evaluate(RiskClass::Write), GateDecision::Denied(_)));
    }

    #[test]
    fn registry_loads_custom_profiles_and_skips_unknown_classes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(
            &path,
            r#"{"reviewer": {"read_only": "auto", "write": "deny", "network": "auto"}}"#,
        )
        .unwrap();

        let registry = ProfileRegistry::load(&path).unwrap();
        let reviewer = registry.get("reviewer").unwrap();
        assert_eq!(reviewer.decision_for(RiskClass::Write), Decision::Deny);
        assert_eq!(reviewer.decision_for(RiskClass::Shell), Decision::Confirm);
        assert!(registry.get("default").is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(EngineError::InvalidArguments(_))
        ));
    }

    #[test]
    fn registry_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let mut registry = ProfileRegistry::builtin();
        registry.insert(AgentProfile::new("ops").with_rule(RiskClass::Shell, Decision::Auto));
        registry.save(&path).unwrap();

        let loaded = ProfileRegistry::load(&path).unwrap();
        assert_eq!(
            loaded.get("ops").unwrap().decision_for(RiskClass::Shell),
            Decision::Auto
        );
        assert_eq!(loaded.get("plan").unwrap(), AgentProfile::plan());
    }
}
