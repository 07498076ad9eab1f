//! Tool abstraction for the session engine.
//!
//! The [`Tool`] trait defines what every tool provides: a static API
//! definition (name, description, JSON schema), a [`RiskClass`] for the
//! permission gate, and an async `execute` method. Tools are collected into a
//! [`ToolSet`], resolved once at startup, which handles dispatch, definition
//! export, argument validation, timeouts, and result truncation.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::agent::permission::RiskClass;
use crate::{EngineError, ToolDef};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Default timeout for tool execution.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = crate::Result<String>> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the model can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct Touch { workspace: Arc<Workspace> }
///
/// impl Tool for Touch {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn risk_class(&self) -> RiskClass {
///         RiskClass::Write
///     }
///
///     fn execute(&self, arguments: &str) -> ToolFuture<'_> {
///         let arguments = arguments.to_string();
///         Box::pin(async move {
///             let args: TouchArgs = parse_tool_args(&arguments)?;
///             // ...
///             Ok(format!("touched {}", args.path))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// Execute the tool with the raw JSON arguments string.
    ///
    /// Errors come back as [`EngineError`]; the session turns them into a
    /// failed tool result the model can read.
    fn execute(&self, arguments: &str) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().function.name
    }

    /// Risk class consulted by the permission gate. Defaults to read-only.
    fn risk_class(&self) -> RiskClass {
        RiskClass::ReadOnly
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A registry of tools dispatched by name.
///
/// # Example
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_max_result_bytes(15_000)
///     .with_workspace_tools(&workspace)
///     .with_arg_validation(true)
///     .with_default_timeout(Some(Duration::from_secs(30)))
///     .with_if(allow_shell, Shell::new(workspace.clone()));
///
/// let defs = tools.definitions();
/// ```
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    validate_args: bool,
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .field("max_result_bytes", &self.max_result_bytes)
            .finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: false,
            default_timeout: Some(DEFAULT_TOOL_TIMEOUT),
        }
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    pub fn max_result_bytes(&self) -> usize {
        self.max_result_bytes
    }

    /// Validate arguments against the tool's JSON Schema before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Timeout applied to every execution. `None` disables it.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register `tool` only when `condition` holds, keeping the builder chain.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Definitions for the model API, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn risk_class_of(&self, name: &str) -> crate::Result<RiskClass> {
        self.tools
            .get(name)
            .map(|t| t.risk_class())
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }

    /// Execute a tool call by name with optional validation, timeout, and
    /// truncation of the successful result.
    pub async fn execute(&self, name: &str, arguments: &str) -> crate::Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;

        if self.validate_args {
            validate_tool_arguments(tool.as_ref(), arguments)?;
        }

        log_tool_call(name, arguments);
        let start = Instant::now();

        let result = match self.default_timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(arguments)).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s",
                        start.elapsed().as_secs_f64()
                    );
                    Err(EngineError::Timeout {
                        what: format!("tool '{name}'"),
                        secs: limit.as_secs(),
                    })
                }
            },
            None => tool.execute(arguments).await,
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(output) => {
                debug!(
                    "Tool {name} completed in {elapsed_ms:.0}ms ({} bytes)",
                    output.len()
                );
                trace!(
                    "Tool {name} result preview: {}",
                    truncate_chars(output, 300)
                );
            }
            Err(e) => debug!("Tool {name} failed in {elapsed_ms:.0}ms: {e}"),
        }

        result.map(|output| truncate_result(output, self.max_result_bytes))
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler =
    Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = crate::Result<String>> + Send>> + Send + Sync>;

/// A closure-based tool that parses its arguments and calls a handler.
///
/// Use it for stateless tools; tools that need shared state implement
/// [`Tool`] on a struct.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoArgs {
///     /// Text to echo back.
///     text: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDef::new("echo", "Echo text", json_schema_for::<EchoArgs>()),
///     |args: EchoArgs| async move { Ok(args.text) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
    risk: RiskClass,
}

impl FnTool {
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<String>> + Send + 'static,
    {
        let erased =
            move |raw: String| -> Pin<Box<dyn Future<Output = crate::Result<String>> + Send>> {
                match parse_tool_args::<A>(&raw) {
                    Ok(args) => Box::pin(handler(args)),
                    Err(e) => Box::pin(async move { Err(e) }),
                }
            };

        Self {
            def,
            handler: Box::new(erased),
            risk: RiskClass::ReadOnly,
        }
    }

    pub fn risk(mut self, risk: RiskClass) -> Self {
        self.risk = risk;
        self
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        (self.handler)(arguments.to_string())
    }

    fn risk_class(&self) -> RiskClass {
        self.risk
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .field("risk", &self.risk)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the tool's declared JSON Schema.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> crate::Result<()> {
    let value: serde_json::Value = serde_json::from_str(arguments).map_err(|e| {
        EngineError::InvalidArguments(format!("invalid JSON for tool '{}': {e}", tool.name()))
    })?;

    let schema = tool.definition().function.parameters;
    // An invalid schema is the tool author's bug, not the model's.
    let Ok(validator) = jsonschema::validator_for(&schema) else {
        return Ok(());
    };

    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InvalidArguments(format!(
            "tool '{}': {}",
            tool.name(),
            errors.join("; ")
        )))
    }
}

/// Log a tool call at INFO with a truncated argument preview.
pub fn log_tool_call(name: &str, arguments: &str) {
    info!("[tool] {name}({})", truncate_chars(arguments, 120));
    trace!("[tool] {name} arguments: {arguments}");
}

/// Cut `s` to at most `max` bytes on a char boundary, appending a notice.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}...\n[truncated: {} bytes total]",
        s.get(..cut).unwrap_or_default(),
        s.len()
    )
}

/// Cut `s` to at most `max` characters, ending in `...` when shortened.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Parse raw JSON arguments into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &str) -> crate::Result<T> {
    serde_json::from_str(arguments).map_err(|e| EngineError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_schema_for;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        /// Text to echo.
        text: String,
    }

    fn echo() -> FnTool {
        FnTool::new(
            ToolDef::new("echo", "Echo text", json_schema_for::<EchoArgs>()),
            |args: EchoArgs| async move { Ok(args.text) },
        )
    }

    struct Slow;

    impl Tool for Slow {
        fn definition(&self) -> ToolDef {
            ToolDef::new("slow", "Sleeps", serde_json::json!({"type": "object"}))
        }

        fn risk_class(&self) -> RiskClass {
            RiskClass::Shell
        }

        fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("done".into())
            })
        }
    }

    #[tokio::test]
    async fn executes_known_tool() {
        let tools = ToolSet::new().with(echo());
        let out = tools.execute("echo", r#"{"text":"hi"}"#).await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_typed_error() {
        let tools = ToolSet::new().with(echo());
        let err = tools.execute("nope", "{}").await.unwrap_err();
        assert_eq!(err, EngineError::ToolNotFound("nope".into()));
        assert!(tools.risk_class_of("nope").is_err());
    }

    #[tokio::test]
    async fn bad_arguments_are_invalid_arguments() {
        let tools = ToolSet::new().with(echo());
        let err = tools.execute("echo", r#"{"wrong":1}"#).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn schema_validation_rejects_before_execution() {
        let tools = ToolSet::new().with(echo()).with_arg_validation(true);
        let err = tools.execute("echo", r#"{"text": 5}"#).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArguments(m) if m.contains("echo")));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let tools = ToolSet::new()
            .with(Slow)
            .with_default_timeout(Some(Duration::from_millis(20)));
        let err = tools.execute("slow", "{}").await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn long_results_are_truncated() {
        let tools = ToolSet::new().with(echo()).with_max_result_bytes(10);
        let args = serde_json::json!({"text": "x".repeat(50)}).to_string();
        let out = tools.execute("echo", &args).await.unwrap();
        assert!(out.starts_with("xxxxxxxxxx..."));
        assert!(out.contains("[truncated: 50 bytes total]"));
    }

    #[test]
    fn risk_class_and_sorted_definitions() {
        let tools = ToolSet::new().with(Slow).with(echo());
        assert_eq!(tools.risk_class_of("slow").unwrap(), RiskClass::Shell);
        assert_eq!(tools.risk_class_of("echo").unwrap(), RiskClass::ReadOnly);
        let names: Vec<String> = tools
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(names, vec!["echo", "slow"]);
    }

    #[test]
    fn with_if_respects_condition() {
        let tools = ToolSet::new().with_if(false, Slow).with_if(true, echo());
        assert_eq!(tools.names(), vec!["echo"]);
    }

    #[test]
    fn truncation_helpers_respect_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("garbage", 4), "g...");
        let out = truncate_result("héllo wörld".to_string(), 2);
        assert!(out.starts_with("h..."));
        assert_eq!(truncate_result("ok".to_string(), 10), "ok");
    }
}
