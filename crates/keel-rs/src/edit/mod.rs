//! Line-addressed file editing.
//!
//! [`LineEditor`] reads and replaces exact 1-based inclusive line ranges.
//! Every mutation takes the path's writer lock from [`PathLocks`], writes the
//! full new content to a temporary file in the same directory, renames it
//! into place, and invalidates the path's cached
//! [`KnowledgeMap`](crate::index::KnowledgeMap).

pub mod editor;
pub mod lines;
pub mod locks;

pub use editor::{EditorConfig, LineEditor, ReadOutcome, ReplaceOutcome};
pub use lines::LineEnding;
pub use locks::{PathGuard, PathLocks};
