//! Per-path writer locks.
//!
//! The only synchronisation shared between concurrent sessions (a parent and
//! its delegated subtasks) is this registry. Guards are RAII: dropping the
//! guard, including by cancelling the future that holds it, releases the path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::EngineError;

/// Held while a writer owns a path.
#[derive(Debug)]
pub struct PathGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl PathGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Registry of async mutexes keyed by resolved path.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Drop slots nobody holds or waits on.
        locks.retain(|p, m| p == path || Arc::strong_count(m) > 1);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Take the lock without waiting.
    pub fn try_acquire(&self, path: &Path) -> crate::Result<PathGuard> {
        let guard = self
            .slot(path)
            .try_lock_owned()
            .map_err(|_| EngineError::LockContention(path.display().to_string()))?;
        Ok(PathGuard {
            path: path.to_path_buf(),
            _guard: guard,
        })
    }

    /// Wait up to `timeout` for the lock, then fail with `LockContention`.
    pub async fn acquire(&self, path: &Path, timeout: Duration) -> crate::Result<PathGuard> {
        if let Ok(guard) = self.try_acquire(path) {
            return Ok(guard);
        }
        debug!("waiting for lock on {}", path.display());
        let slot = self.slot(path);
        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(PathGuard {
                path: path.to_path_buf(),
                _guard: guard,
            }),
            Err(_) => Err(EngineError::LockContention(path.display().to_string())),
        }
    }

    /// Whether some writer currently holds `path`.
    pub fn is_locked(&self, path: &Path) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.get(path).is_some_and(|m| m.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_writer_contends() {
        let locks = PathLocks::new();
        let path = Path::new("/w/a.rs");
        let _held = locks.try_acquire(path).unwrap();
        let err = locks.try_acquire(path).unwrap_err();
        assert_eq!(err, EngineError::LockContention("/w/a.rs".into()));
        assert!(locks.is_locked(path));
    }

    #[tokio::test]
    async fn different_paths_are_independent() {
        let locks = PathLocks::new();
        let _a = locks.try_acquire(Path::new("/w/a.rs")).unwrap();
        assert!(locks.try_acquire(Path::new("/w/b.rs")).is_ok());
    }

    #[tokio::test]
    async fn drop_releases() {
        let locks = PathLocks::new();
        let path = Path::new("/w/a.rs");
        drop(locks.try_acquire(path).unwrap());
        assert!(!locks.is_locked(path));
        assert!(locks.try_acquire(path).is_ok());
    }

    #[tokio::test]
    async fn acquire_times_out() {
        let locks = PathLocks::new();
        let path = Path::new("/w/a.rs");
        let _held = locks.try_acquire(path).unwrap();
        let err = locks
            .acquire(path, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "lock_contention");
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let locks = Arc::new(PathLocks::new());
        let path = PathBuf::from("/w/a.rs");
        let held = locks.try_acquire(&path).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            let path = path.clone();
            tokio::spawn(async move { locks.acquire(&path, Duration::from_secs(2)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancelled_holder_releases() {
        let locks = Arc::new(PathLocks::new());
        let path = PathBuf::from("/w/a.rs");
        let task = {
            let locks = Arc::clone(&locks);
            let path = path.clone();
            tokio::spawn(async move {
                let _g = locks.try_acquire(&path).unwrap();
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(locks.is_locked(&path));
        task.abort();
        let _ = task.await;
        assert!(!locks.is_locked(&path));
    }
}
