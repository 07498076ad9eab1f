use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::lines;
use super::locks::{PathGuard, PathLocks};
use crate::EngineError;
use crate::index::cache::KnowledgeCache;

/// Editor limits.
#[derive(Debug, Clone)]
pub struct EditorConfig {
    /// Largest range `read` will return.
    pub max_read_bytes: usize,
    /// How long a writer waits for a held path before `LockContention`.
    pub lock_timeout: Duration,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_read_bytes: 64_000,
            lock_timeout: Duration::from_secs(2),
        }
    }
}

impl EditorConfig {
    pub fn with_max_read_bytes(mut self, bytes: usize) -> Self {
        self.max_read_bytes = bytes;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOutcome {
    pub start_line: usize,
    /// Lines without terminators.
    pub lines: Vec<String>,
    pub total_lines: usize,
}

impl ReadOutcome {
    /// `N: text` rows, as shown to the model.
    pub fn numbered(&self) -> String {
        let width = (self.start_line + self.lines.len()).to_string().len();
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            out.push_str(&format!("{:>width$}: {line}\n", self.start_line + i));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaceOutcome {
    pub old_line_count: usize,
    pub new_line_count: usize,
    pub total_lines: usize,
}

/// Reads and atomically rewrites files by line range.
///
/// Paths are expected to be resolved already (see
/// [`Workspace::resolve`](crate::tools::workspace::Workspace::resolve)); the
/// editor itself does no sandboxing.
pub struct LineEditor {
    config: EditorConfig,
    locks: Arc<PathLocks>,
    cache: Arc<KnowledgeCache>,
}

impl LineEditor {
    pub fn new(locks: Arc<PathLocks>, cache: Arc<KnowledgeCache>) -> Self {
        Self {
            config: EditorConfig::default(),
            locks,
            cache,
        }
    }

    pub fn with_config(mut self, config: EditorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<PathLocks> {
        &self.locks
    }

    async fn read_text(path: &Path) -> crate::Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        String::from_utf8(bytes).map_err(|_| {
            EngineError::InvalidArguments(format!("{} is not valid UTF-8 text", path.display()))
        })
    }

    fn check_read_size(&self, selected: &[String], what: impl FnOnce() -> String) -> crate::Result<()> {
        let bytes: usize = selected.iter().map(|l| l.len() + 1).sum();
        if bytes > self.config.max_read_bytes {
            return Err(EngineError::TooLarge {
                what: what(),
                limit: self.config.max_read_bytes,
            });
        }
        Ok(())
    }

    /// Lines `start..=end` (1-based, inclusive).
    pub async fn read(&self, path: &Path, start: usize, end: usize) -> crate::Result<ReadOutcome> {
        let text = Self::read_text(path).await?;
        let total_lines = lines::split_lines(&text).len();
        let selected = lines::select(&text, start, end)?;
        self.check_read_size(&selected, || format!("lines {start}-{end} of {}", path.display()))?;
        Ok(ReadOutcome {
            start_line: start,
            lines: selected,
            total_lines,
        })
    }

    /// The last `count` lines of a file. Invalid UTF-8 is replaced rather
    /// than refused, since logs often carry stray bytes.
    pub async fn tail(&self, path: &Path, count: usize) -> crate::Result<ReadOutcome> {
        if count == 0 {
            return Err(EngineError::InvalidArguments(
                "line count must be at least 1".into(),
            ));
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        let text = String::from_utf8_lossy(&bytes);
        let total_lines = lines::split_lines(&text).len();
        if total_lines == 0 {
            return Ok(ReadOutcome {
                start_line: 1,
                lines: Vec::new(),
                total_lines,
            });
        }
        let start = total_lines.saturating_sub(count) + 1;
        let selected = lines::select(&text, start, total_lines)?;
        self.check_read_size(&selected, || {
            format!("last {count} lines of {}", path.display())
        })?;
        Ok(ReadOutcome {
            start_line: start,
            lines: selected,
            total_lines,
        })
    }

    /// Replace lines `start..=end` with `new_content`.
    ///
    /// On any failure before the final rename the file is untouched.
    pub async fn replace(
        &self,
        path: &Path,
        start: usize,
        end: usize,
        new_content: &str,
    ) -> crate::Result<ReplaceOutcome> {
        let _guard = self.locks.acquire(path, self.config.lock_timeout).await?;
        let text = Self::read_text(path).await?;
        let spliced = lines::splice(&text, start, end, new_content)?;
        write_atomic(path, spliced.content.as_bytes()).await?;
        self.cache.invalidate(path);

        let total_lines = lines::split_lines(&spliced.content).len();
        info!(
            "replaced lines {start}-{end} of {} ({} -> {} lines)",
            path.display(),
            spliced.old_line_count,
            spliced.new_line_count
        );
        Ok(ReplaceOutcome {
            old_line_count: spliced.old_line_count,
            new_line_count: spliced.new_line_count,
            total_lines,
        })
    }

    /// Create or overwrite a whole file. Parent directories are created.
    /// Returns the number of bytes written.
    pub async fn write_file(&self, path: &Path, content: &str) -> crate::Result<usize> {
        let _guard = self.locks.acquire(path, self.config.lock_timeout).await?;
        create_parent(path).await?;
        write_atomic(path, content.as_bytes()).await?;
        self.cache.invalidate(path);
        info!("wrote {} ({} bytes)", path.display(), content.len());
        Ok(content.len())
    }

    pub async fn delete_file(&self, path: &Path) -> crate::Result<()> {
        let _guard = self.locks.acquire(path, self.config.lock_timeout).await?;
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        if !meta.is_file() {
            return Err(EngineError::InvalidArguments(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        self.cache.invalidate(path);
        info!("deleted {}", path.display());
        Ok(())
    }

    /// Lock two paths in a fixed order, so two operations naming the same
    /// pair in opposite directions cannot deadlock.
    async fn acquire_pair(&self, a: &Path, b: &Path) -> crate::Result<(PathGuard, PathGuard)> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let timeout = self.config.lock_timeout;
        let first = self.locks.acquire(first, timeout).await?;
        let second = self.locks.acquire(second, timeout).await?;
        Ok((first, second))
    }

    /// Whole-directory changes may touch any cached map below them.
    fn invalidate(&self, is_dir: bool, paths: &[&Path]) {
        if is_dir {
            self.cache.clear();
        } else {
            for path in paths {
                self.cache.invalidate(path);
            }
        }
    }

    /// Move a file or directory. The destination must not exist; missing
    /// parents are created. Files inside a moved directory are not locked
    /// individually.
    pub async fn move_path(&self, from: &Path, to: &Path) -> crate::Result<()> {
        check_not_nested(from, to)?;
        let _guards = self.acquire_pair(from, to).await?;
        let meta = tokio::fs::metadata(from)
            .await
            .map_err(|e| EngineError::io(from, e))?;
        ensure_absent(to).await?;
        create_parent(to).await?;
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| EngineError::io(from, e))?;
        self.invalidate(meta.is_dir(), &[from, to]);
        info!("moved {} to {}", from.display(), to.display());
        Ok(())
    }

    /// Copy a file or a directory tree and return the number of files
    /// copied. A single file lands through a temp file and rename; a tree
    /// that fails part way is removed again.
    pub async fn copy_path(&self, from: &Path, to: &Path) -> crate::Result<usize> {
        check_not_nested(from, to)?;
        let _guards = self.acquire_pair(from, to).await?;
        let meta = tokio::fs::metadata(from)
            .await
            .map_err(|e| EngineError::io(from, e))?;
        ensure_absent(to).await?;
        create_parent(to).await?;

        let copied = if meta.is_dir() {
            let (src, dst) = (from.to_path_buf(), to.to_path_buf());
            tokio::task::spawn_blocking(move || {
                copy_tree(&src, &dst).inspect_err(|_| {
                    let _ = std::fs::remove_dir_all(&dst);
                })
            })
            .await
            .map_err(|e| EngineError::Io {
                path: from.display().to_string(),
                message: e.to_string(),
            })??
        } else {
            let bytes = tokio::fs::read(from)
                .await
                .map_err(|e| EngineError::io(from, e))?;
            write_atomic(to, &bytes).await?;
            1
        };
        self.invalidate(meta.is_dir(), &[to]);
        info!("copied {} to {} ({copied} files)", from.display(), to.display());
        Ok(copied)
    }

    /// Create a directory and any missing parents. Returns `false` when it
    /// already existed.
    pub async fn make_dir(&self, path: &Path) -> crate::Result<bool> {
        let _guard = self.locks.acquire(path, self.config.lock_timeout).await?;
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => return Ok(false),
            Ok(_) => {
                return Err(EngineError::InvalidArguments(format!(
                    "{} exists and is not a directory",
                    path.display()
                )));
            }
            Err(_) => {}
        }
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        info!("created directory {}", path.display());
        Ok(true)
    }
}

fn check_not_nested(from: &Path, to: &Path) -> crate::Result<()> {
    if to.starts_with(from) {
        return Err(EngineError::InvalidArguments(format!(
            "{} cannot be moved or copied into itself",
            from.display()
        )));
    }
    Ok(())
}

async fn ensure_absent(path: &Path) -> crate::Result<()> {
    if tokio::fs::symlink_metadata(path).await.is_ok() {
        return Err(EngineError::InvalidArguments(format!(
            "{} already exists",
            path.display()
        )));
    }
    Ok(())
}

async fn create_parent(path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::io(parent, e))?;
    }
    Ok(())
}

/// Recursive copy. Symlinks are skipped.
fn copy_tree(from: &Path, to: &Path) -> crate::Result<usize> {
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.map_err(|e| EngineError::Io {
            path: from.display().to_string(),
            message: e.to_string(),
        })?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(rel);
        let kind = entry.file_type();
        if kind.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| EngineError::io(&target, e))?;
        } else if kind.is_file() {
            std::fs::copy(entry.path(), &target).map_err(|e| EngineError::io(entry.path(), e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// `.<name>.keel.tmp` next to `path`, so the rename stays on one filesystem.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{name}.keel.tmp"))
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> crate::Result<()> {
    let tmp = temp_path_for(path);
    let result = async {
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| EngineError::io(&tmp, e))?;
        if let Ok(meta) = tokio::fs::metadata(path).await {
            let _ = tokio::fs::set_permissions(&tmp, meta.permissions()).await;
        }
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| EngineError::io(path, e))
    }
    .await;
    if result.is_err() {
        debug!("atomic write of {} failed, removing temp file", path.display());
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}
