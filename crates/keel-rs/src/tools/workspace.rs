//! The project root every built-in tool operates on.
//!
//! A [`Workspace`] bundles the shared pieces of the engine for one root:
//! the [`Indexer`], the [`KnowledgeCache`], the per-path [`PathLocks`], the
//! [`LineEditor`] and the [`ReferenceScanner`]. Delegated sub-sessions share
//! the same `Workspace`, so the path locks are the only synchronization
//! between concurrent sessions.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::EngineError;
use crate::edit::{EditorConfig, LineEditor, PathLocks};
use crate::index::Indexer;
use crate::index::cache::KnowledgeCache;
use crate::index::references::{ReferenceScanner, ScanConfig};

/// Directory under the root where engine state (snapshots) lives.
pub const STATE_DIR_NAME: &str = ".keel";

pub struct Workspace {
    root: PathBuf,
    indexer: Arc<Indexer>,
    cache: Arc<KnowledgeCache>,
    locks: Arc<PathLocks>,
    editor: LineEditor,
    scanner: ReferenceScanner,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("cached_maps", &self.cache.len())
            .finish()
    }
}

impl Workspace {
    /// Open `root`, which must be an existing directory. The root is
    /// canonicalized so trust records and lock keys agree.
    pub fn open(root: impl AsRef<Path>) -> crate::Result<Self> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).map_err(|e| EngineError::io(root, e))?;
        if !root.is_dir() {
            return Err(EngineError::InvalidArguments(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let indexer = Arc::new(Indexer::new());
        let cache = Arc::new(KnowledgeCache::new());
        let locks = Arc::new(PathLocks::new());
        let editor = LineEditor::new(Arc::clone(&locks), Arc::clone(&cache));
        let scanner = ReferenceScanner::new(&root, Arc::clone(&indexer), Arc::clone(&cache));
        debug!("Opened workspace {}", root.display());
        Ok(Self {
            root,
            indexer,
            cache,
            locks,
            editor,
            scanner,
        })
    }

    pub fn with_editor_config(mut self, config: EditorConfig) -> Self {
        self.editor = self.editor.with_config(config);
        self
    }

    pub fn with_scan_config(mut self, config: ScanConfig) -> Self {
        self.scanner = self.scanner.with_config(config);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn cache(&self) -> &Arc<KnowledgeCache> {
        &self.cache
    }

    pub fn locks(&self) -> &Arc<PathLocks> {
        &self.locks
    }

    pub fn editor(&self) -> &LineEditor {
        &self.editor
    }

    pub fn scanner(&self) -> &ReferenceScanner {
        &self.scanner
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }

    /// Resolve a tool-supplied path against the root.
    ///
    /// Relative paths are joined to the root; absolute paths must already lie
    /// inside it. `..` components are refused outright, and so is any path
    /// whose existing part leads outside the root through a symlink.
    pub fn resolve(&self, path: &str) -> crate::Result<PathBuf> {
        let requested = Path::new(path.trim());
        let mut resolved = if requested.is_absolute() {
            PathBuf::new()
        } else {
            self.root.clone()
        };
        for component in requested.components() {
            match component {
                Component::ParentDir => {
                    return Err(EngineError::PermissionDenied(format!(
                        "path traversal not allowed: {path}"
                    )));
                }
                Component::CurDir => {}
                other => resolved.push(other.as_os_str()),
            }
        }
        let inside = resolved.starts_with(&self.root)
            && real_location(&resolved).is_some_and(|real| real.starts_with(&self.root));
        if !inside {
            return Err(EngineError::PermissionDenied(format!(
                "{path} is outside the workspace {}",
                self.root.display()
            )));
        }
        Ok(resolved)
    }

    /// Root-relative display form of an absolute path inside the workspace.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Where `path` actually lives: its deepest existing ancestor canonicalized,
/// with the not-yet-existing tail appended. `None` for a dangling symlink.
fn real_location(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(mut real) => {
                real.extend(tail.iter().rev().copied());
                return Some(real);
            }
            Err(_) if existing.symlink_metadata().is_ok() => return None,
            Err(_) => {
                tail.push(existing.file_name()?);
                existing = existing.parent()?;
            }
        }
    }
}
