//! Persisted folder trust.
//!
//! A [`TrustStore`] is loaded once at session start, consulted by the
//! permission gate, and written back through an explicit [`TrustStore::save`]
//! after a grant. Trust never expires; a path inside a trusted root is
//! trusted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::EngineError;

pub const TRUSTED_FOLDERS_FILE: &str = "trusted_folders.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedFolderRecord {
    pub root: PathBuf,
    pub granted_at: DateTime<Utc>,
}

/// Trusted roots keyed by their path string.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    path: Option<PathBuf>,
    records: BTreeMap<String, TrustedFolderRecord>,
}

impl TrustStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store backed by `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| EngineError::persist("trusted folders", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(EngineError::io(&path, e)),
        };
        debug!(
            "Loaded {} trusted folder(s) from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            path: Some(path),
            records,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_trusted(&self, path: &Path) -> bool {
        self.records.values().any(|r| path.starts_with(&r.root))
    }

    /// Record trust for `root`. Re-granting keeps the original timestamp.
    pub fn grant(&mut self, root: &Path) -> &TrustedFolderRecord {
        let key = root.to_string_lossy().into_owned();
        self.records.entry(key).or_insert_with(|| {
            info!("Trusting folder {}", root.display());
            TrustedFolderRecord {
                root: root.to_path_buf(),
                granted_at: Utc::now(),
            }
        })
    }

    pub fn records(&self) -> impl Iterator<Item = &TrustedFolderRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the store back to its file. In-memory stores do nothing.
    pub fn save(&self) -> crate::Result<()> {
        match &self.path {
            Some(path) => save_json_atomic(path, &self.records),
            None => Ok(()),
        }
    }
}

/// Serialize `value` as pretty JSON and move it into place via a sibling
/// temp file. Parent directories are created.
pub(crate) fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> crate::Result<()> {
    let data = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::persist(path.display().to_string(), e))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.keel.tmp"));
    if let Err(e) = std::fs::write(&tmp, data) {
        let _ = std::fs::remove_file(&tmp);
        return Err(EngineError::io(&tmp, e));
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        EngineError::io(path, e)
    })
}
