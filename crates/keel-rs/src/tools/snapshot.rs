//! `snapshot`: create, restore and list workspace save points.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::agent::permission::RiskClass;
use crate::agent::snapshot::SnapshotManager;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::spec::ToolSpec;
use crate::{EngineError, ToolDef};

#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotAction {
    Create,
    Restore,
    List,
}

#[derive(Deserialize, JsonSchema)]
pub struct SnapshotArgs {
    /// What to do: 'create', 'restore' or 'list'.
    pub action: SnapshotAction,
    /// Snapshot name (required for create and restore), e.g. 'before-rename'.
    #[serde(default)]
    pub name: Option<String>,
}

pub struct SnapshotTool {
    manager: Arc<SnapshotManager>,
}

impl SnapshotTool {
    pub fn new(manager: Arc<SnapshotManager>) -> Self {
        Self { manager }
    }
}

impl Tool for SnapshotTool {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("snapshot")
            .purpose("Save or restore a named copy of the workspace files")
            .when_to_use("Before a risky multi-file change, and to undo it if it goes wrong")
            .when_not_to_use("To undo a single small edit; replace_lines the old text back")
            .parameters_for::<SnapshotArgs>()
            .example(
                "snapshot(action='restore', name='before-rename')",
                "Files roll back; your memory of later edits does not",
            )
            .to_tool_def()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Write
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: SnapshotArgs = parse_tool_args(&arguments)?;
            let manager = Arc::clone(&self.manager);
            tokio::task::spawn_blocking(move || run(&manager, args))
                .await
                .map_err(|e| EngineError::Io {
                    path: "snapshot".into(),
                    message: e.to_string(),
                })?
        })
    }
}

fn run(manager: &SnapshotManager, args: SnapshotArgs) -> crate::Result<String> {
    let name = || {
        args.name
            .as_deref()
            .ok_or_else(|| EngineError::InvalidArguments("'name' is required".into()))
    };
    match args.action {
        SnapshotAction::Create => {
            let m = manager.create(name()?)?;
            Ok(format!(
                "Created snapshot '{}' ({} files, {} bytes)",
                m.name, m.file_count, m.total_bytes
            ))
        }
        SnapshotAction::Restore => Ok(manager.restore(name()?)?.notice()),
        SnapshotAction::List => {
            let all = manager.list()?;
            if all.is_empty() {
                return Ok("No snapshots.".to_string());
            }
            Ok(all
                .iter()
                .map(|m| {
                    format!(
                        "{} ({} files, {})",
                        m.name,
                        m.file_count,
                        m.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }
}
