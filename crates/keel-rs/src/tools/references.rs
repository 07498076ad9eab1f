//! `find_references`: impact analysis before a rename or signature change.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::spec::ToolSpec;
use crate::tools::workspace::Workspace;
use crate::{EngineError, ToolDef};

#[derive(Deserialize, JsonSchema)]
pub struct FindReferencesArgs {
    /// Identifier to look for (whole-token matches only).
    pub symbol: String,
    /// Paths to skip, relative to the workspace root, each with everything below it
    /// ('dist' skips dist/ but not src/dist/). Glob patterns ('*.min.js', '**/dist')
    /// are matched against both the relative path and the file name.
    #[serde(default)]
    pub ignore_paths: Vec<String>,
}

pub struct FindReferences {
    workspace: Arc<Workspace>,
}

impl FindReferences {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for FindReferences {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("find_references")
            .purpose("List every whole-token occurrence of a symbol across the workspace")
            .when_to_use("Before renaming or changing a function, class or variable, to see what breaks")
            .when_not_to_use("To read a file's structure; use file_meta")
            .parameters_for::<FindReferencesArgs>()
            .example(
                "find_references(symbol='process_data', ignore_paths=['dist'])",
                "path:line rows sorted by path then line; process_data_v2 is not a match",
            )
            .output_format("'path:line (in enclosing): snippet' per occurrence; declarations are marked (definition)")
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: FindReferencesArgs = parse_tool_args(&arguments)?;
            let workspace = Arc::clone(&self.workspace);
            // The walk is synchronous file I/O.
            let report = tokio::task::spawn_blocking(move || {
                workspace
                    .scanner()
                    .find_references(&args.symbol, &args.ignore_paths)
            })
            .await
            .map_err(|e| EngineError::Io {
                path: self.workspace.root().display().to_string(),
                message: e.to_string(),
            })??;
            Ok(report.render())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::ToolSet;

    #[tokio::test]
    async fn reports_token_matches_outside_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(
            dir.path().join("main.py"),
            "def process_data(x):\n    return x\n\nprocess_data_v2(1)\nprocess_data(2)\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("dist/bundle.py"), "process_data(3)\n").unwrap();

        let ws = Arc::new(Workspace::open(dir.path()).unwrap());
        let tools = ToolSet::new().with(FindReferences::new(ws));
        let out = tools
            .execute(
                "find_references",
                r#"{"symbol":"process_data","ignore_paths":["dist"]}"#,
            )
            .await
            .unwrap();
        assert!(out.contains("main.py:1"), "{out}");
        assert!(out.contains("main.py:5"), "{out}");
        assert!(!out.contains("main.py:4"), "{out}");
        assert!(!out.contains("bundle.py"), "{out}");
    }

    #[tokio::test]
    async fn empty_symbol_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::open(dir.path()).unwrap());
        let err = FindReferences::new(ws)
            .execute(r#"{"symbol":"  "}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }
}
