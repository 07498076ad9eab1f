//! Tools the model can call, and the registry that dispatches them.
//!
//! Every capability (reading lines, editing, searching, running commands,
//! delegating) is a [`Tool`] implementor with a fixed argument schema and a
//! [`RiskClass`](crate::agent::permission::RiskClass). Tools are collected
//! into a [`ToolSet`] once at startup; an unknown name is a typed
//! `ToolNotFound` error.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait, [`ToolSet`], [`FnTool`], truncation helpers.
//! - [`workspace`]: [`Workspace`], the root plus the shared indexer, cache,
//!   locks, editor and scanner every built-in tool uses.
//! - [`common`]: file, listing and shell tools. Register everything at once
//!   with [`ToolSet::with_workspace_tools`].
//! - [`references`]: `find_references`.
//! - [`snapshot`]: `snapshot`.
//! - [`spec`]: [`ToolSpec`](spec::ToolSpec) builder for tool descriptions.
//!
//! The `delegate` tool lives with the dispatcher in
//! [`agent::delegate`](crate::agent::delegate).

pub mod common;
pub mod core;
pub mod references;
pub mod snapshot;
pub mod spec;
pub mod workspace;

pub use core::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, Tool, ToolFuture, ToolSet, parse_tool_args, truncate_chars,
    truncate_result, validate_tool_arguments,
};
pub use workspace::Workspace;
