//! Built-in workspace tools.
//!
//! Every tool holds an `Arc<Workspace>` and resolves its `path` argument
//! through [`Workspace::resolve`], so traversal outside the root is refused
//! before any I/O happens.
//!
//! | Tool | Name | Risk |
//! |------|------|------|
//! | [`FileMeta`] | `file_meta` | read-only |
//! | [`ReadLines`] | `read_lines` | read-only |
//! | [`ReplaceLines`] | `replace_lines` | write |
//! | [`WriteFile`] | `write_file` | write |
//! | [`DeleteFile`] | `delete_file` | delete |
//! | [`FileOperations`] | `file_operations` | write |
//! | [`LogWatcher`] | `log_watcher` | read-only |
//! | [`ListDirectory`] | `list_directory` | read-only |
//! | [`Shell`] | `shell` | shell |
//!
//! [`ToolSet::with_workspace_tools`] also registers `find_references` and
//! `snapshot` from their own modules.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::process::Command;

use crate::agent::permission::RiskClass;
use crate::agent::snapshot::SnapshotManager;
use crate::tools::core::{Tool, ToolFuture, ToolSet, parse_tool_args};
use crate::tools::references::FindReferences;
use crate::tools::snapshot::SnapshotTool;
use crate::tools::spec::ToolSpec;
use crate::tools::workspace::Workspace;
use crate::{EngineError, ToolDef};

/// Blocked shell command patterns (lowercased substrings).
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &["rm -rf /", "mkfs", "> /dev/"];

/// Directory listings stop after this many entries.
pub const MAX_LIST_ENTRIES: usize = 500;

// ── Typed argument structs ──────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct PathArgs {
    /// File path relative to the workspace root (e.g. 'src/lib.rs').
    pub path: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct ReadLinesArgs {
    /// File path relative to the workspace root.
    pub path: String,
    /// First line to read (1-based).
    pub start: usize,
    /// Last line to read (1-based, inclusive).
    pub end: usize,
}

#[derive(Deserialize, JsonSchema)]
pub struct ReplaceLinesArgs {
    /// File path relative to the workspace root.
    pub path: String,
    /// First line to replace (1-based).
    pub start: usize,
    /// Last line to replace (1-based, inclusive).
    pub end: usize,
    /// Replacement text. May span any number of lines; empty deletes the range.
    pub content: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// File path relative to the workspace root. Parent directories are created.
    pub path: String,
    /// Complete new file content.
    pub content: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct LogWatcherArgs {
    /// Log file relative to the workspace root (e.g. 'logs/server.log').
    pub path: String,
    /// Number of trailing lines to return.
    #[serde(default = "default_last_lines")]
    pub last_lines: usize,
}

fn default_last_lines() -> usize {
    100
}

#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Move,
    Copy,
    Mkdir,
}

#[derive(Deserialize, JsonSchema)]
pub struct FileOperationArgs {
    /// What to do: 'move', 'copy' or 'mkdir'.
    pub action: FileAction,
    /// Source path, or the directory to create for 'mkdir'.
    pub path: String,
    /// Destination path for 'move' and 'copy'. Must not exist yet.
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ListDirectoryArgs {
    /// Directory relative to the workspace root. Defaults to the root.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ShellArgs {
    /// Shell command to run in the workspace root (e.g. 'cargo test -q').
    pub command: String,
}

// ── Registration ────────────────────────────────────────────────────

impl ToolSet {
    /// Register every built-in tool that operates on `workspace`.
    pub fn with_workspace_tools(self, workspace: &Arc<Workspace>) -> Self {
        self.with(FileMeta::new(Arc::clone(workspace)))
            .with(ReadLines::new(Arc::clone(workspace)))
            .with(ReplaceLines::new(Arc::clone(workspace)))
            .with(WriteFile::new(Arc::clone(workspace)))
            .with(DeleteFile::new(Arc::clone(workspace)))
            .with(FileOperations::new(Arc::clone(workspace)))
            .with(LogWatcher::new(Arc::clone(workspace)))
            .with(ListDirectory::new(Arc::clone(workspace)))
            .with(FindReferences::new(Arc::clone(workspace)))
            .with(Shell::new(Arc::clone(workspace)))
            .with(SnapshotTool::new(Arc::new(SnapshotManager::new(Arc::clone(
                workspace,
            )))))
    }
}

// ── FileMeta ────────────────────────────────────────────────────────

/// Structural outline of one file from the cached knowledge map.
pub struct FileMeta {
    workspace: Arc<Workspace>,
}

impl FileMeta {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for FileMeta {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("file_meta")
            .purpose("Show a file's line count and its functions, classes and methods with line spans")
            .when_to_use("Before reading or editing a file, to find the exact lines you need")
            .when_not_to_use("When you already know the line range; use read_lines")
            .parameters_for::<PathArgs>()
            .example(
                "file_meta(path='src/lib.rs')",
                "Header with total lines, then one row per symbol: kind name [start-end]",
            )
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: PathArgs = parse_tool_args(&arguments)?;
            let path = self.workspace.resolve(&args.path)?;
            let workspace = Arc::clone(&self.workspace);
            let map = tokio::task::spawn_blocking(move || {
                workspace.cache().get_or_scan(workspace.indexer(), &path)
            })
            .await
            .map_err(|e| EngineError::Io {
                path: args.path.clone(),
                message: e.to_string(),
            })??;
            Ok(map.render())
        })
    }
}

// ── ReadLines ───────────────────────────────────────────────────────

pub struct ReadLines {
    workspace: Arc<Workspace>,
}

impl ReadLines {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for ReadLines {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("read_lines")
            .purpose("Read an exact, inclusive, 1-based line range from a file")
            .when_to_use("When you need the verbatim text of specific lines, e.g. a symbol span from file_meta")
            .when_not_to_use("When you do not yet know where things are; use file_meta or find_references first")
            .parameters_for::<ReadLinesArgs>()
            .example(
                "read_lines(path='src/lib.rs', start=10, end=24)",
                "Lines 10-24, each prefixed with its line number",
            )
            .output_format("Header line, then '<n>: <text>' per line")
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: ReadLinesArgs = parse_tool_args(&arguments)?;
            let path = self.workspace.resolve(&args.path)?;
            let outcome = self
                .workspace
                .editor()
                .read(&path, args.start, args.end)
                .await?;
            Ok(format!(
                "{} lines {}-{} of {}\n{}",
                self.workspace.relative(&path).display(),
                args.start,
                args.end,
                outcome.total_lines,
                outcome.numbered()
            ))
        })
    }
}

// ── ReplaceLines ────────────────────────────────────────────────────

pub struct ReplaceLines {
    workspace: Arc<Workspace>,
}

impl ReplaceLines {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for ReplaceLines {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("replace_lines")
            .purpose("Replace an exact, inclusive, 1-based line range of a file with new text")
            .when_to_use("For surgical edits once you have read the lines you are changing")
            .when_not_to_use("When creating a file or rewriting it entirely; use write_file")
            .parameters_for::<ReplaceLinesArgs>()
            .example(
                "replace_lines(path='src/lib.rs', start=12, end=14, content='fn a() {}')",
                "Lines 12-14 become one line; everything else is untouched",
            )
            .output_format("Summary with old and new line counts and the new file length")
            .to_tool_def()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Write
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: ReplaceLinesArgs = parse_tool_args(&arguments)?;
            let path = self.workspace.resolve(&args.path)?;
            let outcome = self
                .workspace
                .editor()
                .replace(&path, args.start, args.end, &args.content)
                .await?;
            Ok(format!(
                "Replaced lines {}-{} of {} ({} -> {} lines); file now has {} lines",
                args.start,
                args.end,
                self.workspace.relative(&path).display(),
                outcome.old_line_count,
                outcome.new_line_count,
                outcome.total_lines
            ))
        })
    }
}

// ── WriteFile ───────────────────────────────────────────────────────

pub struct WriteFile {
    workspace: Arc<Workspace>,
}

impl WriteFile {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for WriteFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("write_file")
            .purpose("Create a file or overwrite it with the given content")
            .when_to_use("For new files, or when most of a file changes")
            .when_not_to_use("For small edits to an existing file; use replace_lines")
            .parameters_for::<WriteFileArgs>()
            .to_tool_def()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Write
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: WriteFileArgs = parse_tool_args(&arguments)?;
            let path = self.workspace.resolve(&args.path)?;
            let written = self
                .workspace
                .editor()
                .write_file(&path, &args.content)
                .await?;
            Ok(format!(
                "Wrote {written} bytes to {}",
                self.workspace.relative(&path).display()
            ))
        })
    }
}

// ── DeleteFile ──────────────────────────────────────────────────────

pub struct DeleteFile {
    workspace: Arc<Workspace>,
}

impl DeleteFile {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for DeleteFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("delete_file")
            .purpose("Delete a single file")
            .when_not_to_use("To empty a file; use write_file with empty content")
            .parameters_for::<PathArgs>()
            .to_tool_def()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Delete
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: PathArgs = parse_tool_args(&arguments)?;
            let path = self.workspace.resolve(&args.path)?;
            self.workspace.editor().delete_file(&path).await?;
            Ok(format!("Deleted {}", self.workspace.relative(&path).display()))
        })
    }
}

// ── FileOperations ──────────────────────────────────────────────────

pub struct FileOperations {
    workspace: Arc<Workspace>,
}

impl FileOperations {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for FileOperations {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("file_operations")
            .purpose("Move, copy or create files and directories inside the workspace")
            .when_to_use("For renames, backups and new directories, instead of mv/cp/mkdir in shell")
            .when_not_to_use("To delete; use delete_file. To change content; use replace_lines or write_file")
            .parameters_for::<FileOperationArgs>()
            .example(
                "file_operations(action='move', path='src/old.rs', destination='src/new.rs')",
                "Moved src/old.rs to src/new.rs",
            )
            .to_tool_def()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Write
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: FileOperationArgs = parse_tool_args(&arguments)?;
            let source = self.workspace.resolve(&args.path)?;
            let editor = self.workspace.editor();
            let destination = || {
                let dest = args.destination.as_deref().ok_or_else(|| {
                    EngineError::InvalidArguments(format!(
                        "'destination' is required for {:?}",
                        args.action
                    ))
                })?;
                self.workspace.resolve(dest)
            };
            let rel_source = self.workspace.relative(&source).display().to_string();
            match args.action {
                FileAction::Move => {
                    let dest = destination()?;
                    editor.move_path(&source, &dest).await?;
                    Ok(format!(
                        "Moved {rel_source} to {}",
                        self.workspace.relative(&dest).display()
                    ))
                }
                FileAction::Copy => {
                    let dest = destination()?;
                    let copied = editor.copy_path(&source, &dest).await?;
                    Ok(format!(
                        "Copied {rel_source} to {} ({copied} file(s))",
                        self.workspace.relative(&dest).display()
                    ))
                }
                FileAction::Mkdir => {
                    if editor.make_dir(&source).await? {
                        Ok(format!("Created directory {rel_source}"))
                    } else {
                        Ok(format!("Directory {rel_source} already exists"))
                    }
                }
            }
        })
    }
}

// ── LogWatcher ──────────────────────────────────────────────────────

pub struct LogWatcher {
    workspace: Arc<Workspace>,
}

impl LogWatcher {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for LogWatcher {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("log_watcher")
            .purpose("Show the last lines of a log or output file")
            .when_to_use("To check runtime errors or process output without reading the whole file")
            .when_not_to_use("For source files; use file_meta and read_lines")
            .parameters_for::<LogWatcherArgs>()
            .example(
                "log_watcher(path='logs/server.log', last_lines=50)",
                "The final 50 lines with their line numbers",
            )
            .output_format("Header line, then '<n>: <text>' per line")
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: LogWatcherArgs = parse_tool_args(&arguments)?;
            let path = self.workspace.resolve(&args.path)?;
            let outcome = self.workspace.editor().tail(&path, args.last_lines).await?;
            let rel = self.workspace.relative(&path).display().to_string();
            if outcome.lines.is_empty() {
                return Ok(format!("{rel} is empty"));
            }
            Ok(format!(
                "{rel} lines {}-{} of {}\n{}",
                outcome.start_line,
                outcome.total_lines,
                outcome.total_lines,
                outcome.numbered()
            ))
        })
    }
}

// ── ListDirectory ───────────────────────────────────────────────────

pub struct ListDirectory {
    workspace: Arc<Workspace>,
}

impl ListDirectory {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for ListDirectory {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("list_directory")
            .purpose("List the entries of one directory")
            .when_to_use("To discover which files exist before inspecting them")
            .when_not_to_use("To find where a symbol is used; use find_references")
            .parameters_for::<ListDirectoryArgs>()
            .output_format("One entry per line, sorted by name. Directories end with '/'")
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: ListDirectoryArgs = parse_tool_args(&arguments)?;
            let rel = args.path.unwrap_or_else(|| ".".to_string());
            let dir = self.workspace.resolve(&rel)?;
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| EngineError::io(&dir, e))?;

            let mut entries = Vec::new();
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| EngineError::io(&dir, e))?
            {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                    name.push('/');
                }
                entries.push(name);
            }
            entries.sort();

            let total = entries.len();
            let mut out = entries
                .into_iter()
                .take(MAX_LIST_ENTRIES)
                .collect::<Vec<_>>()
                .join("\n");
            if total > MAX_LIST_ENTRIES {
                out.push_str(&format!("\n[{} more entries omitted]", total - MAX_LIST_ENTRIES));
            }
            if out.is_empty() {
                out = "(empty directory)".to_string();
            }
            Ok(out)
        })
    }
}

// ── Shell ───────────────────────────────────────────────────────────

/// Run `sh -c` in the workspace root.
pub struct Shell {
    workspace: Arc<Workspace>,
    blocked_commands: Vec<String>,
}

impl Shell {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            blocked_commands: DEFAULT_BLOCKED_COMMANDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Add a blocked command pattern (lowercased substring match).
    pub fn block_command(mut self, pattern: impl Into<String>) -> Self {
        self.blocked_commands.push(pattern.into().to_lowercase());
        self
    }
}

impl Tool for Shell {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("shell")
            .purpose("Run a shell command in the workspace root and return its output")
            .when_to_use("For builds, tests, git and anything the file tools do not cover")
            .when_not_to_use(
                "To read or edit files; use read_lines, replace_lines and write_file, \
                 which keep the structural index consistent",
            )
            .parameters_for::<ShellArgs>()
            .example("shell(command='cargo test -q')", "Test output; stderr follows stdout")
            .output_format("stdout, then [stderr] and stderr if non-empty")
            .to_tool_def()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Shell
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: ShellArgs = parse_tool_args(&arguments)?;
            let lower = args.command.to_lowercase();
            if let Some(pattern) = self.blocked_commands.iter().find(|p| lower.contains(p.as_str())) {
                return Err(EngineError::PermissionDenied(format!(
                    "command blocked (matches '{pattern}')"
                )));
            }
            let output = Command::new("sh")
                .arg("-c")
                .arg(&args.command)
                .current_dir(self.workspace.root())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| EngineError::Io {
                    path: "sh".into(),
                    message: e.to_string(),
                })?;
            Ok(format_output(output))
        })
    }
}

fn format_output(output: std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        if stderr.is_empty() {
            stdout.into_owned()
        } else {
            format!("{stdout}\n[stderr]\n{stderr}")
        }
    } else {
        format!("Command failed ({}):\n{stdout}\n{stderr}", output.status)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<Workspace>, ToolSet) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/lib.rs"),
            "fn alpha() {\n    1\n}\n\nfn beta() {\n    2\n}\n",
        )
        .unwrap();
        let ws = Arc::new(Workspace::open(dir.path()).unwrap());
        let tools = ToolSet::new().with_workspace_tools(&ws);
        (dir, ws, tools)
    }

    #[test]
    fn registers_every_workspace_tool_with_its_risk() {
        let (_dir, _ws, tools) = setup();
        assert_eq!(
            tools.names(),
            vec![
                "delete_file",
                "file_meta",
                "file_operations",
                "find_references",
                "list_directory",
                "log_watcher",
                "read_lines",
                "replace_lines",
                "shell",
                "snapshot",
                "write_file",
            ]
        );
        assert_eq!(tools.risk_class_of("replace_lines").unwrap(), RiskClass::Write);
        assert_eq!(tools.risk_class_of("delete_file").unwrap(), RiskClass::Delete);
        assert_eq!(tools.risk_class_of("shell").unwrap(), RiskClass::Shell);
        assert_eq!(tools.risk_class_of("file_meta").unwrap(), RiskClass::ReadOnly);
        assert_eq!(tools.risk_class_of("file_operations").unwrap(), RiskClass::Write);
        assert_eq!(tools.risk_class_of("log_watcher").unwrap(), RiskClass::ReadOnly);
    }

    #[tokio::test]
    async fn file_meta_lists_symbols() {
        let (_dir, _ws, tools) = setup();
        let out = tools
            .execute("file_meta", r#"{"path":"src/lib.rs"}"#)
            .await
            .unwrap();
        assert!(out.contains("7 lines"), "{out}");
        assert!(out.contains("fn alpha [1-3]"), "{out}");
        assert!(out.contains("fn beta [5-7]"), "{out}");
    }

    #[tokio::test]
    async fn replace_then_read_round_trip() {
        let (_dir, ws, tools) = setup();
        tools
            .execute("file_meta", r#"{"path":"src/lib.rs"}"#)
            .await
            .unwrap();
        let path = ws.resolve("src/lib.rs").unwrap();
        assert!(ws.cache().contains(&path));

        let out = tools
            .execute(
                "replace_lines",
                r#"{"path":"src/lib.rs","start":2,"end":2,"content":"    10\n    + 1"}"#,
            )
            .await
            .unwrap();
        assert!(out.contains("(1 -> 2 lines)"), "{out}");
        assert!(!ws.cache().contains(&path));

        let read = tools
            .execute("read_lines", r#"{"path":"src/lib.rs","start":2,"end":3}"#)
            .await
            .unwrap();
        assert!(read.contains("2:     10"), "{read}");
        assert!(read.contains("3:     + 1"), "{read}");
    }

    #[tokio::test]
    async fn invalid_range_leaves_file_untouched() {
        let (dir, _ws, tools) = setup();
        let before = std::fs::read(dir.path().join("src/lib.rs")).unwrap();
        let err = tools
            .execute(
                "replace_lines",
                r#"{"path":"src/lib.rs","start":5,"end":99,"content":"x"}"#,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "range_invalid");
        assert_eq!(std::fs::read(dir.path().join("src/lib.rs")).unwrap(), before);
    }

    #[tokio::test]
    async fn write_list_delete() {
        let (dir, _ws, tools) = setup();
        tools
            .execute("write_file", r#"{"path":"docs/notes.md","content":"hi\n"}"#)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("docs/notes.md")).unwrap(),
            "hi\n"
        );

        let listing = tools.execute("list_directory", "{}").await.unwrap();
        assert_eq!(listing, "docs/\nsrc/");

        tools
            .execute("delete_file", r#"{"path":"docs/notes.md"}"#)
            .await
            .unwrap();
        assert!(!dir.path().join("docs/notes.md").exists());

        let err = tools
            .execute("delete_file", r#"{"path":"docs/notes.md"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "path_not_found");
    }

    #[tokio::test]
    async fn log_watcher_tails_the_file() {
        let (dir, _ws, tools) = setup();
        std::fs::create_dir(dir.path().join("logs")).unwrap();
        std::fs::write(dir.path().join("logs/run.log"), "boot\nwarn\npanic at foo\n").unwrap();
        let out = tools
            .execute("log_watcher", r#"{"path":"logs/run.log","last_lines":2}"#)
            .await
            .unwrap();
        assert_eq!(out, "logs/run.log lines 2-3 of 3\n2: warn\n3: panic at foo\n");

        let all = tools
            .execute("log_watcher", r#"{"path":"logs/run.log"}"#)
            .await
            .unwrap();
        assert!(all.contains("1: boot"), "{all}");
    }

    #[tokio::test]
    async fn file_operations_move_copy_mkdir() {
        let (dir, ws, tools) = setup();
        tools
            .execute("file_meta", r#"{"path":"src/lib.rs"}"#)
            .await
            .unwrap();
        let lib = ws.resolve("src/lib.rs").unwrap();
        assert!(ws.cache().contains(&lib));

        let out = tools
            .execute(
                "file_operations",
                r#"{"action":"copy","path":"src/lib.rs","destination":"backup/lib.rs"}"#,
            )
            .await
            .unwrap();
        assert_eq!(out, "Copied src/lib.rs to backup/lib.rs (1 file(s))");

        tools
            .execute(
                "file_operations",
                r#"{"action":"move","path":"src/lib.rs","destination":"src/core.rs"}"#,
            )
            .await
            .unwrap();
        assert!(!dir.path().join("src/lib.rs").exists());
        assert!(dir.path().join("src/core.rs").exists());
        assert!(!ws.cache().contains(&lib));

        let out = tools
            .execute("file_operations", r#"{"action":"mkdir","path":"docs/api"}"#)
            .await
            .unwrap();
        assert_eq!(out, "Created directory docs/api");

        let err = tools
            .execute("file_operations", r#"{"action":"move","path":"src/core.rs"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
        let err = tools
            .execute(
                "file_operations",
                r#"{"action":"copy","path":"src/core.rs","destination":"../outside.rs"}"#,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let (_dir, _ws, tools) = setup();
        let err = tools
            .execute("read_lines", r#"{"path":"../secret","start":1,"end":1}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[tokio::test]
    async fn shell_runs_in_root_and_blocks_patterns() {
        let (_dir, _ws, tools) = setup();
        let out = tools.execute("shell", r#"{"command":"ls src"}"#).await.unwrap();
        assert_eq!(out.trim(), "lib.rs");

        let err = tools
            .execute("shell", r#"{"command":"sudo MKFS /dev/sda"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");

        let failed = tools.execute("shell", r#"{"command":"exit 3"}"#).await.unwrap();
        assert!(failed.starts_with("Command failed"));
    }
}
