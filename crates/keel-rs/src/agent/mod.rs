//! Agent runtime: the [`Session`] loop and everything it consults.
//!
//! - [`session`]: the loop, its [`LoopState`] machine and [`CancelFlag`]. Start here.
//! - [`config`]: [`SessionConfig`], [`DelegationConfig`] and the [`Toggle`] wrapper.
//! - [`events`]: [`EventHandler`] and [`SessionEvent`] for observing the loop
//!   and answering confirmations.
//! - [`permission`]: risk classes, profiles and the gate decision.
//! - [`trust`]: the persisted record of trusted workspace roots.
//! - [`delegate`]: sub-sessions with their own history and turn budget.
//! - [`snapshot`]: named save points of the file tree.

pub mod config;
pub mod delegate;
pub mod events;
pub mod permission;
pub mod session;
pub mod snapshot;
pub mod trust;

pub use config::{DelegationConfig, SessionConfig, Toggle};
pub use delegate::{DelegateTool, DelegationOutcome, DelegationRequest, Dispatcher};
pub use events::{
    CompositeEventHandler, EventHandler, EventResponse, FnEventHandler, LoggingHandler,
    NoopHandler, SessionEvent,
};
pub use permission::{
    AgentProfile, Decision, GateDecision, PermissionState, ProfileRegistry, RiskClass,
    TrustStatus, decide,
};
pub use session::{CancelFlag, LoopState, Session, SessionOutcome, SessionStatus};
pub use snapshot::{RestoreReport, SnapshotManager, SnapshotManifest};
pub use trust::{TrustStore, TrustedFolderRecord};
