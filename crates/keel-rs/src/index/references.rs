//! Symbol reference scanning ("impact analysis").
//!
//! Walks the project tree and reports every whole-token occurrence of a
//! symbol, sorted by path then line. Binary files and files over
//! [`ScanConfig::max_file_bytes`] are skipped. Each hit is annotated with its
//! enclosing symbol from the file's cached [`KnowledgeMap`](super::KnowledgeMap),
//! which also tells us whether the hit is the definition itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::Indexer;
use super::cache::KnowledgeCache;
use crate::EngineError;

/// Leading bytes probed for a NUL when deciding whether a file is binary.
const BINARY_PROBE_BYTES: usize = 8 * 1024;

/// Snippets longer than this are cut.
const MAX_SNIPPET_CHARS: usize = 200;

/// Directories never worth scanning.
pub const DEFAULT_IGNORES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    ".keel",
];

/// Limits for a reference scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub max_file_bytes: u64,
    pub max_results: usize,
    /// Directory names skipped at any depth.
    pub default_ignores: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 1_000_000,
            max_results: 500,
            default_ignores: DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ScanConfig {
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn with_max_results(mut self, n: usize) -> Self {
        self.max_results = n;
        self
    }
}

/// One occurrence of the symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    /// Root-relative path with `/` separators.
    pub path: String,
    pub line: usize,
    /// The trimmed source line.
    pub snippet: String,
    /// Innermost symbol containing the line, if the file has structure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosing: Option<String>,
    /// The line declares a symbol with this exact name.
    pub definition: bool,
}

/// Result of [`ReferenceScanner::find_references`].
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceReport {
    pub symbol: String,
    pub references: Vec<Reference>,
    pub files_scanned: usize,
    pub files_skipped: usize,
    /// More than `max_results` references existed.
    pub truncated: bool,
}

impl ReferenceReport {
    /// Text form returned to the model.
    pub fn render(&self) -> String {
        if self.references.is_empty() {
            return format!(
                "No references to `{}` ({} files scanned).",
                self.symbol, self.files_scanned
            );
        }
        let mut out = format!(
            "{} reference(s) to `{}` ({} files scanned):\n",
            self.references.len(),
            self.symbol,
            self.files_scanned
        );
        for r in &self.references {
            let tag = match (&r.enclosing, r.definition) {
                (_, true) => " (definition)".to_string(),
                (Some(sym), false) => format!(" (in {sym})"),
                (None, false) => String::new(),
            };
            out.push_str(&format!("{}:{}{}: {}\n", r.path, r.line, tag, r.snippet));
        }
        if self.truncated {
            out.push_str("[results truncated; narrow the search with ignore_paths]\n");
        }
        out
    }
}

// ── Ignore matching ────────────────────────────────────────────────

/// Directory names skipped at any depth, root-relative paths skipped with
/// everything below them, and glob patterns tried against the relative
/// path and the file name.
#[derive(Default)]
struct IgnoreSet {
    components: Vec<String>,
    paths: Vec<String>,
    globs: Vec<glob::Pattern>,
}

impl IgnoreSet {
    fn new<'a>(
        components: impl IntoIterator<Item = &'a str>,
        patterns: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut set = Self {
            components: components.into_iter().map(str::to_string).collect(),
            ..Self::default()
        };
        for raw in patterns {
            let p = raw.trim().trim_start_matches("./").trim_end_matches('/');
            if p.is_empty() {
                continue;
            }
            if p.contains(['*', '?', '['])
                && let Ok(pattern) = glob::Pattern::new(p)
            {
                set.globs.push(pattern);
                continue;
            }
            set.paths.push(p.to_string());
        }
        set
    }

    /// `rel` is root-relative with `/` separators.
    fn is_ignored(&self, rel: &str) -> bool {
        let name = rel.rsplit('/').next().unwrap_or(rel);
        self.components.iter().any(|c| rel.split('/').any(|part| part == c))
            || self.paths.iter().any(|p| {
                rel == p || rel.strip_prefix(p.as_str()).is_some_and(|rest| rest.starts_with('/'))
            })
            || self.globs.iter().any(|g| g.matches(rel) || g.matches(name))
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ── Token matching ─────────────────────────────────────────────────

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `symbol` occurs in `line` bounded by non-identifier characters.
pub fn contains_token(line: &str, symbol: &str) -> bool {
    line.match_indices(symbol).any(|(idx, matched)| {
        let before = line.get(..idx).and_then(|s| s.chars().next_back());
        let after = line
            .get(idx + matched.len()..)
            .and_then(|s| s.chars().next());
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn snippet(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_SNIPPET_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_SNIPPET_CHARS).collect();
        format!("{cut}...")
    }
}

// ── Scanner ────────────────────────────────────────────────────────

/// Read-only reference scanner over a project root.
pub struct ReferenceScanner {
    root: PathBuf,
    config: ScanConfig,
    indexer: Arc<Indexer>,
    cache: Arc<KnowledgeCache>,
}

impl ReferenceScanner {
    pub fn new(
        root: impl Into<PathBuf>,
        indexer: Arc<Indexer>,
        cache: Arc<KnowledgeCache>,
    ) -> Self {
        Self {
            root: root.into(),
            config: ScanConfig::default(),
            indexer,
            cache,
        }
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every whole-token occurrence of `symbol` outside `ignore_paths`.
    ///
    /// `ignore_paths` entries match a root-relative path (and everything
    /// below it), any path component with that name, or a glob pattern.
    pub fn find_references(
        &self,
        symbol: &str,
        ignore_paths: &[String],
    ) -> crate::Result<ReferenceReport> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(EngineError::InvalidArguments("symbol must not be empty".into()));
        }
        if !self.root.is_dir() {
            return Err(EngineError::PathNotFound(self.root.display().to_string()));
        }

        let ignores = IgnoreSet::new(
            self.config.default_ignores.iter().map(String::as_str),
            ignore_paths.iter().map(String::as_str),
        );

        let mut references = Vec::new();
        let mut files_scanned = 0;
        let mut files_skipped = 0;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !ignores.is_ignored(&relative_path(&self.root, e.path())));

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let too_large = entry
                .metadata()
                .map(|m| m.len() > self.config.max_file_bytes)
                .unwrap_or(true);
            if too_large {
                files_skipped += 1;
                continue;
            }
            let Ok(bytes) = std::fs::read(entry.path()) else {
                files_skipped += 1;
                continue;
            };
            let probe = bytes.len().min(BINARY_PROBE_BYTES);
            if bytes.iter().take(probe).any(|b| *b == 0) {
                files_skipped += 1;
                continue;
            }
            files_scanned += 1;

            let content = String::from_utf8_lossy(&bytes);
            if !content.contains(symbol) {
                continue;
            }
            let rel = relative_path(&self.root, entry.path());
            let hits: Vec<(usize, &str)> = content
                .lines()
                .enumerate()
                .filter(|(_, line)| contains_token(line, symbol))
                .map(|(i, line)| (i + 1, line))
                .collect();
            if hits.is_empty() {
                continue;
            }

            let map = self.cache.get_or_scan(&self.indexer, entry.path()).ok();
            for (line, text) in hits {
                let enclosing = map
                    .as_ref()
                    .and_then(|m| m.symbol_at(line))
                    .map(|s| s.name.clone());
                let definition = map
                    .as_ref()
                    .is_some_and(|m| m.find(symbol).iter().any(|s| s.start_line == line));
                references.push(Reference {
                    path: rel.clone(),
                    line,
                    snippet: snippet(text),
                    enclosing,
                    definition,
                });
            }
        }

        references.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        let truncated = references.len() > self.config.max_results;
        references.truncate(self.config.max_results);

        debug!(
            "find_references({symbol}): {} hit(s), {files_scanned} scanned, {files_skipped} skipped",
            references.len()
        );
        if truncated {
            info!("find_references({symbol}) truncated at {}", self.config.max_results);
        }

        Ok(ReferenceReport {
            symbol: symbol.to_string(),
            references,
            files_scanned,
            files_skipped,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner(root: &Path) -> ReferenceScanner {
        ReferenceScanner::new(root, Arc::new(Indexer::new()), Arc::new(KnowledgeCache::new()))
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn token_boundaries() {
        assert!(contains_token("x = process_data(y)", "process_data"));
        assert!(contains_token("process_data", "process_data"));
        assert!(!contains_token("process_data_v2()", "process_data"));
        assert!(!contains_token("my_process_data()", "process_data"));
        assert!(contains_token("a.process_data_v2 + process_data", "process_data"));
        assert!(contains_token("obj.process_data()", "process_data"));
    }

    #[test]
    fn finds_exact_tokens_sorted_and_respects_ignores() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/b.py", b"from a import process_data\n\nprocess_data(1)\n");
        write(
            root,
            "src/a.py",
            b"def process_data(x):\n    return x\n\n\ndef process_data_v2(x):\n    return process_data(x)\n",
        );
        write(root, "dist/bundle.js", b"process_data(2)\n");
        write(root, "node_modules/x/index.js", b"process_data(3)\n");

        let report = scanner(root)
            .find_references("process_data", &["dist".to_string()])
            .unwrap();
        let hits: Vec<_> = report
            .references
            .iter()
            .map(|r| (r.path.as_str(), r.line))
            .collect();
        assert_eq!(
            hits,
            vec![("src/a.py", 1), ("src/a.py", 6), ("src/b.py", 1), ("src/b.py", 3)]
        );
        assert!(report.references[0].definition);
        assert_eq!(report.references[1].enclosing.as_deref(), Some("process_data_v2"));
        assert!(!report.truncated);
    }

    #[test]
    fn ignore_paths_are_relative_to_the_root() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dist/bundle.js", b"render();\n");
        write(dir.path(), "src/dist/render.js", b"render();\n");
        write(dir.path(), "web/node_modules/x/index.js", b"render();\n");
        let report = scanner(dir.path())
            .find_references("render", &["dist/".to_string()])
            .unwrap();
        let paths: Vec<_> = report.references.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["src/dist/render.js"]);

        let report = scanner(dir.path())
            .find_references("render", &["src/dist".to_string()])
            .unwrap();
        let paths: Vec<_> = report.references.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["dist/bundle.js"]);
    }

    #[test]
    fn glob_ignores_match_file_names() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rs", b"fn target_fn() {}\n");
        write(dir.path(), "gen/a.generated.rs", b"target_fn();\n");
        let report = scanner(dir.path())
            .find_references("target_fn", &["*.generated.rs".to_string()])
            .unwrap();
        assert_eq!(report.references.len(), 1);
        assert_eq!(report.references[0].path, "a.rs");
    }

    #[test]
    fn skips_binary_and_large_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bin.dat", b"needle\0\0\0");
        write(dir.path(), "big.txt", &[b'x'; 64]);
        write(dir.path(), "ok.txt", b"needle here\n");
        let s = scanner(dir.path()).with_config(ScanConfig::default().with_max_file_bytes(32));
        let report = s.find_references("needle", &[]).unwrap();
        assert_eq!(report.references.len(), 1);
        assert_eq!(report.files_skipped, 2);
    }

    #[test]
    fn truncates_at_max_results() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "many.txt", "hit\n".repeat(10).as_bytes());
        let s = scanner(dir.path()).with_config(ScanConfig::default().with_max_results(3));
        let report = s.find_references("hit", &[]).unwrap();
        assert_eq!(report.references.len(), 3);
        assert!(report.truncated);
        assert!(report.render().contains("truncated"));
    }

    #[test]
    fn empty_symbol_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = scanner(dir.path()).find_references("  ", &[]).unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[test]
    fn scan_does_not_modify_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", b"def f():\n    f()\n");
        let before = std::fs::read(dir.path().join("a.py")).unwrap();
        scanner(dir.path()).find_references("f", &[]).unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.py")).unwrap(), before);
    }
}
