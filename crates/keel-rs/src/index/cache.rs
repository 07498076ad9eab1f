//! Fingerprinted cache of [`KnowledgeMap`]s.
//!
//! A cached map is served only while the file's content hash still matches.
//! Editor writes additionally call [`KnowledgeCache::invalidate`], so a stale
//! map is never reused across a write even if the hash check were skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use super::{Indexer, KnowledgeMap};
use crate::EngineError;

/// FNV-1a hash of file content.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

struct CachedMap {
    fingerprint: u64,
    map: Arc<KnowledgeMap>,
}

/// Session-shared map cache, keyed by resolved path.
#[derive(Default)]
pub struct KnowledgeCache {
    entries: Mutex<HashMap<PathBuf, CachedMap>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl KnowledgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached map for `path`, rescanning if the content changed.
    pub fn get_or_scan(&self, indexer: &Indexer, path: &Path) -> crate::Result<Arc<KnowledgeMap>> {
        let bytes = std::fs::read(path).map_err(|e| EngineError::io(path, e))?;
        let fingerprint = fnv1a(&bytes);

        {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = entries.get(path)
                && cached.fingerprint == fingerprint
            {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!("knowledge cache hit: {}", path.display());
                return Ok(Arc::clone(&cached.map));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let map = Arc::new(indexer.scan_bytes(path, &bytes));
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                path.to_path_buf(),
                CachedMap {
                    fingerprint,
                    map: Arc::clone(&map),
                },
            );
        Ok(map)
    }

    /// Drop the entry for `path`. The next request rescans from scratch.
    pub fn invalidate(&self, path: &Path) {
        if self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path)
            .is_some()
        {
            trace!("knowledge cache invalidated: {}", path.display());
        }
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_differs_on_content() {
        assert_ne!(fnv1a(b"fn a() {}"), fnv1a(b"fn b() {}"));
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
    }

    #[test]
    fn second_request_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn a() {}\n").unwrap();

        let cache = KnowledgeCache::new();
        let indexer = Indexer::new();
        let first = cache.get_or_scan(&indexer, &path).unwrap();
        let second = cache.get_or_scan(&indexer, &path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn changed_content_rescans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn a() {}\n").unwrap();

        let cache = KnowledgeCache::new();
        let indexer = Indexer::new();
        cache.get_or_scan(&indexer, &path).unwrap();
        std::fs::write(&path, "fn a() {}\nfn b() {}\n").unwrap();
        let map = cache.get_or_scan(&indexer, &path).unwrap();
        assert_eq!(map.symbols.len(), 2);
        assert_eq!(cache.stats(), (0, 2));
    }

    #[test]
    fn invalidate_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "def f():\n    pass\n").unwrap();

        let cache = KnowledgeCache::new();
        cache.get_or_scan(&Indexer::new(), &path).unwrap();
        assert!(cache.contains(&path));
        cache.invalidate(&path);
        assert!(!cache.contains(&path));
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_file_is_path_not_found() {
        let cache = KnowledgeCache::new();
        let err = cache
            .get_or_scan(&Indexer::new(), Path::new("/definitely/not/here.rs"))
            .unwrap_err();
        assert_eq!(err.kind(), "path_not_found");
    }
}
