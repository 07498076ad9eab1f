//! Structural indexing: one linear pass over a source file producing an
//! ordered symbol map.
//!
//! The [`Indexer`] picks a [`ScanStrategy`] by file extension. Every strategy
//! produces the same [`SymbolEntry`] contract; when a strategy cannot make
//! sense of a file (unbalanced braces, non-UTF-8 bytes, unknown extension)
//! the result degrades to a [`KnowledgeMap`] that carries only the line
//! count. Scanning never fails because of file *content*.
//!
//! Maps are deterministic: identical bytes always produce an identical map,
//! which is what lets [`cache::KnowledgeCache`] reuse them safely.

pub mod cache;
pub mod references;
pub mod strategies;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::EngineError;
use strategies::{BraceStrategy, IndentStrategy};

/// Kind of a structural symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Other,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "fn"),
            SymbolKind::Class => write!(f, "class"),
            SymbolKind::Method => write!(f, "method"),
            SymbolKind::Other => write!(f, "other"),
        }
    }
}

/// One symbol and its 1-based inclusive line span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
    /// Nested symbols (methods, inner functions). Always inside this span.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SymbolEntry>,
}

impl SymbolEntry {
    pub fn new(name: impl Into<String>, kind: SymbolKind, start_line: usize, end_line: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            start_line,
            end_line,
            children: Vec::new(),
        }
    }

    pub fn contains_line(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }
}

/// The structural index of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeMap {
    pub path: PathBuf,
    pub total_lines: usize,
    /// Top-level symbols: non-overlapping, sorted by `start_line`.
    pub symbols: Vec<SymbolEntry>,
    /// Name of the strategy that produced the map.
    pub strategy: &'static str,
}

impl KnowledgeMap {
    /// A map with no symbols, only the line count.
    pub fn line_count_only(path: impl Into<PathBuf>, total_lines: usize) -> Self {
        Self {
            path: path.into(),
            total_lines,
            symbols: Vec::new(),
            strategy: strategies::FALLBACK_NAME,
        }
    }

    pub fn is_structured(&self) -> bool {
        !self.symbols.is_empty()
    }

    /// All symbols, depth-first in declaration order.
    pub fn flatten(&self) -> Vec<&SymbolEntry> {
        fn walk<'a>(entries: &'a [SymbolEntry], out: &mut Vec<&'a SymbolEntry>) {
            for e in entries {
                out.push(e);
                walk(&e.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.symbols, &mut out);
        out
    }

    /// The innermost symbol whose span contains `line`.
    pub fn symbol_at(&self, line: usize) -> Option<&SymbolEntry> {
        let mut current = self.symbols.iter().find(|s| s.contains_line(line))?;
        while let Some(child) = current.children.iter().find(|c| c.contains_line(line)) {
            current = child;
        }
        Some(current)
    }

    /// Every symbol named `name`, at any depth.
    pub fn find(&self, name: &str) -> Vec<&SymbolEntry> {
        self.flatten().into_iter().filter(|s| s.name == name).collect()
    }

    /// Compact text rendering returned to the model by `file_meta`.
    pub fn render(&self) -> String {
        fn render_entries(entries: &[SymbolEntry], depth: usize, out: &mut String) {
            for e in entries {
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str(&format!(
                    "{} {} [{}-{}]\n",
                    e.kind, e.name, e.start_line, e.end_line
                ));
                render_entries(&e.children, depth + 1, out);
            }
        }

        let mut out = format!(
            "{} ({} lines, {})\n",
            self.path.display(),
            self.total_lines,
            self.strategy
        );
        if self.symbols.is_empty() {
            out.push_str("  (no structural symbols detected)\n");
        } else {
            render_entries(&self.symbols, 0, &mut out);
        }
        out
    }
}

// ── Strategies ─────────────────────────────────────────────────────

/// A language heuristic that turns source text into symbol rows.
///
/// Return `None` when the structure cannot be determined; the indexer then
/// falls back to a line-count-only map.
pub trait ScanStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn scan(&self, source: &str) -> Option<Vec<SymbolEntry>>;
}

/// Extension-keyed registry of scan strategies.
pub struct Indexer {
    strategies: HashMap<String, Arc<dyn ScanStrategy>>,
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer {
    /// An indexer with the built-in brace and indentation strategies.
    pub fn new() -> Self {
        let strict: Arc<dyn ScanStrategy> = Arc::new(BraceStrategy::keyword_only());
        let c_like: Arc<dyn ScanStrategy> = Arc::new(BraceStrategy::c_like());
        let indent: Arc<dyn ScanStrategy> = Arc::new(IndentStrategy);

        Self::empty()
            .with_strategy(&["rs", "go"], strict)
            .with_strategy(
                &[
                    "c", "h", "cc", "cpp", "hpp", "js", "jsx", "ts", "tsx", "java", "cs", "kt",
                    "swift", "php", "scala",
                ],
                c_like,
            )
            .with_strategy(&["py", "pyi"], indent)
    }

    /// An indexer that only counts lines.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Register `strategy` for the given extensions (without the dot).
    pub fn with_strategy(mut self, extensions: &[&str], strategy: Arc<dyn ScanStrategy>) -> Self {
        for ext in extensions {
            self.strategies
                .insert(ext.to_ascii_lowercase(), Arc::clone(&strategy));
        }
        self
    }

    fn strategy_for(&self, path: &Path) -> Option<&Arc<dyn ScanStrategy>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.strategies.get(&ext)
    }

    /// Read and scan a file. Fails only if the file cannot be read.
    pub fn scan(&self, path: &Path) -> crate::Result<KnowledgeMap> {
        let bytes = std::fs::read(path).map_err(|e| EngineError::io(path, e))?;
        Ok(self.scan_bytes(path, &bytes))
    }

    /// Scan raw bytes as if they were the content of `path`.
    pub fn scan_bytes(&self, path: &Path, bytes: &[u8]) -> KnowledgeMap {
        match std::str::from_utf8(bytes) {
            Ok(source) => self.scan_source(path, source),
            Err(_) => {
                debug!("{}: not UTF-8, counting lines only", path.display());
                KnowledgeMap::line_count_only(path, count_byte_lines(bytes))
            }
        }
    }

    /// Scan source text as if it were the content of `path`.
    pub fn scan_source(&self, path: &Path, source: &str) -> KnowledgeMap {
        let total_lines = source.lines().count();
        let Some(strategy) = self.strategy_for(path) else {
            return KnowledgeMap::line_count_only(path, total_lines);
        };
        match strategy.scan(source) {
            Some(symbols) => KnowledgeMap {
                path: path.to_path_buf(),
                total_lines,
                symbols: normalize(symbols, 1, total_lines),
                strategy: strategy.name(),
            },
            None => {
                debug!(
                    "{}: {} strategy could not determine structure",
                    path.display(),
                    strategy.name()
                );
                KnowledgeMap::line_count_only(path, total_lines)
            }
        }
    }
}

fn count_byte_lines(bytes: &[u8]) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|b| **b == b'\n').count();
    if bytes.last() == Some(&b'\n') {
        newlines
    } else {
        newlines + 1
    }
}

/// Enforce the map invariants on strategy output: spans clamped to
/// `[lo, hi]`, sorted by start line then name, siblings never overlapping.
fn normalize(mut entries: Vec<SymbolEntry>, lo: usize, hi: usize) -> Vec<SymbolEntry> {
    entries.retain(|e| e.start_line >= lo && e.start_line <= hi && e.start_line <= e.end_line);
    for e in &mut entries {
        e.end_line = e.end_line.min(hi);
    }
    entries.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut out: Vec<SymbolEntry> = Vec::with_capacity(entries.len());
    for mut e in entries {
        if let Some(prev) = out.last()
            && e.start_line <= prev.end_line
        {
            continue;
        }
        let children = std::mem::take(&mut e.children);
        e.children = normalize(children, e.start_line, e.end_line);
        out.push(e);
    }
    out
}
