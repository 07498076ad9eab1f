//! Named save points of the workspace file tree.
//!
//! Each snapshot is a full copy of the tree (minus ignored directories) with
//! a `manifest.json`:
//!
//! ```text
//! <root>/.keel/snapshots/
//!   before-refactor/
//!     manifest.json
//!     files/src/lib.rs
//!     files/README.md
//! ```
//!
//! Restoring a snapshot rolls the files back but leaves the session history
//! alone; [`RestoreReport::notice`] says so explicitly so the model knows its
//! memory of later edits is now stale.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::trust::save_json_atomic;
use crate::EngineError;
use crate::index::references::DEFAULT_IGNORES;
use crate::tools::workspace::Workspace;

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SnapshotManifest {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub total_bytes: u64,
    /// Root-relative paths with `/` separators.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub name: String,
    pub restored: usize,
    /// Files created after the snapshot and removed by the restore.
    pub removed: usize,
}

impl RestoreReport {
    pub fn notice(&self) -> String {
        format!(
            "Restored snapshot '{}': {} file(s) restored, {} removed. \
             File state rolled back; conversation memory was not. \
             Re-read any file before editing it.",
            self.name, self.restored, self.removed
        )
    }
}

pub struct SnapshotManager {
    workspace: Arc<Workspace>,
    dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        let dir = workspace.state_dir().join("snapshots");
        Self { workspace, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_dir(&self, name: &str) -> crate::Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(EngineError::InvalidArguments(format!(
                "snapshot name '{name}' may only contain letters, digits, '-', '_' and '.'"
            )));
        }
        Ok(self.dir.join(name))
    }

    /// Copy the current tree into a new snapshot called `name`.
    ///
    /// The copy is built in a hidden staging directory and renamed into
    /// place once its manifest is written, so a failed create leaves nothing
    /// behind under `name`.
    pub fn create(&self, name: &str) -> crate::Result<SnapshotManifest> {
        let dir = self.snapshot_dir(name)?;
        if dir.join(MANIFEST_FILE).exists() {
            return Err(EngineError::InvalidArguments(format!(
                "snapshot '{name}' already exists"
            )));
        }
        // Without a manifest it is debris from an interrupted create.
        remove_debris(&dir)?;
        let staging = self.dir.join(format!(".{name}.partial"));
        remove_debris(&staging)?;

        let result = self.write_snapshot(&staging, name).and_then(|manifest| {
            std::fs::rename(&staging, &dir).map_err(|e| EngineError::io(&dir, e))?;
            Ok(manifest)
        });
        match result {
            Ok(manifest) => {
                info!(
                    "Created snapshot '{name}' ({} files, {} bytes)",
                    manifest.file_count, manifest.total_bytes
                );
                Ok(manifest)
            }
            Err(e) => {
                warn!("Snapshot '{name}' failed, discarding partial copy: {e}");
                let _ = std::fs::remove_dir_all(&staging);
                Err(e)
            }
        }
    }

    fn write_snapshot(&self, staging: &Path, name: &str) -> crate::Result<SnapshotManifest> {
        let root = self.workspace.root();
        let files = tree_files(root);
        let mut total_bytes = 0;
        for rel in &files {
            let src = root.join(rel);
            let dst = staging.join(FILES_DIR).join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
            total_bytes += std::fs::copy(&src, &dst).map_err(|e| EngineError::io(&src, e))?;
        }

        let manifest = SnapshotManifest {
            name: name.to_string(),
            created_at: Utc::now(),
            file_count: files.len(),
            total_bytes,
            files,
        };
        save_json_atomic(&staging.join(MANIFEST_FILE), &manifest)?;
        Ok(manifest)
    }

    pub fn load(&self, name: &str) -> crate::Result<SnapshotManifest> {
        let path = self.snapshot_dir(name)?.join(MANIFEST_FILE);
        let data = std::fs::read_to_string(&path).map_err(|e| match EngineError::io(&path, e) {
            EngineError::PathNotFound(_) => EngineError::PathNotFound(format!("snapshot '{name}'")),
            other => other,
        })?;
        serde_json::from_str(&data).map_err(|e| EngineError::persist(format!("snapshot '{name}'"), e))
    }

    /// Roll the tree back to snapshot `name`.
    ///
    /// Every affected path's lock is taken up front; if any is held the
    /// restore fails with `LockContention` before touching a file. The
    /// knowledge cache is cleared afterwards.
    pub fn restore(&self, name: &str) -> crate::Result<RestoreReport> {
        let manifest = self.load(name)?;
        let snapshot_files = self.snapshot_dir(name)?.join(FILES_DIR);
        let root = self.workspace.root();

        let stale: Vec<String> = tree_files(root)
            .into_iter()
            .filter(|f| !manifest.files.contains(f))
            .collect();

        let mut guards = Vec::with_capacity(stale.len() + manifest.files.len());
        for rel in stale.iter().chain(manifest.files.iter()) {
            guards.push(self.workspace.locks().try_acquire(&root.join(rel))?);
        }

        for rel in &stale {
            let path = root.join(rel);
            std::fs::remove_file(&path).map_err(|e| EngineError::io(&path, e))?;
            debug!("Snapshot restore removed {rel}");
        }
        for rel in &manifest.files {
            let src = snapshot_files.join(rel);
            let dst = root.join(rel);
            copy_atomic(&src, &dst)?;
        }
        drop(guards);
        self.workspace.cache().clear();

        let report = RestoreReport {
            name: name.to_string(),
            restored: manifest.files.len(),
            removed: stale.len(),
        };
        info!("{}", report.notice());
        Ok(report)
    }

    /// All snapshots, oldest first. Unreadable manifests are skipped.
    pub fn list(&self) -> crate::Result<Vec<SnapshotManifest>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::io(&self.dir, e)),
        };
        let mut manifests: Vec<SnapshotManifest> = entries
            .filter_map(Result::ok)
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|entry| {
                let data = std::fs::read_to_string(entry.path().join(MANIFEST_FILE)).ok()?;
                serde_json::from_str(&data).ok()
            })
            .collect();
        manifests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(manifests)
    }
}

fn remove_debris(path: &Path) -> crate::Result<()> {
    let Ok(meta) = path.symlink_metadata() else {
        return Ok(());
    };
    debug!("Removing leftover {}", path.display());
    let removed = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    removed.map_err(|e| EngineError::io(path, e))
}

/// Root-relative paths of every regular file outside the ignored directories.
fn tree_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !DEFAULT_IGNORES
                    .iter()
                    .any(|ignored| e.file_name().to_string_lossy() == *ignored)
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).ok()?;
            Some(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            )
        })
        .collect();
    files.sort();
    files
}

fn copy_atomic(src: &Path, dst: &Path) -> crate::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dst.with_file_name(format!(".{name}.keel.tmp"));
    std::fs::copy(src, &tmp).map_err(|e| EngineError::io(src, e))?;
    std::fs::rename(&tmp, dst).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        EngineError::io(dst, e)
    })
}
