//! Terminal coding agent built on keel-rs.
//!
//! Runs one session against a project directory. Reads the API key from
//! `KEEL_API_KEY` or `OPENROUTER_KEY`.
//!
//! # Examples
//!
//! ```sh
//! keel --workdir /path/to/project --prompt "Add error handling to src/main.rs"
//!
//! # Task from stdin, no prompts
//! echo "List the public API" | keel --non-interactive --profile plan
//! ```

use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use keel_code::{CodeConfig, ConsoleApprovalHandler, RunSummary, exit_code, init_logging};
use keel_rs::prelude::*;
use tracing::{info, warn};

/// Terminal coding agent with bounded context.
#[derive(Parser)]
#[command(name = "keel", version)]
struct Cli {
    /// Task for the agent. Read from stdin when omitted.
    #[arg(long)]
    prompt: Option<String>,

    /// Model to use for completions.
    #[arg(long, default_value = keel_rs::DEFAULT_MODEL)]
    model: String,

    /// Project root the tools operate on.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Permission profile: default, plan, accept-edits, autonomous or a
    /// custom name from profiles.json.
    #[arg(long, default_value = "default")]
    profile: String,

    /// Maximum agent turns.
    #[arg(long, default_value_t = 40)]
    max_turns: u32,

    /// Maximum tokens per model response.
    #[arg(long, default_value_t = 8192)]
    max_tokens: u32,

    /// Never prompt; unanswered confirmations are refused.
    #[arg(long)]
    non_interactive: bool,

    /// Approve every confirmation.
    #[arg(long)]
    yes: bool,

    /// Trust the workspace root without prompting.
    #[arg(long)]
    trust: bool,

    /// Turns between compaction sweeps (0 disables compaction).
    #[arg(long, default_value_t = 10)]
    compaction_interval: u64,

    /// Most recent turns never compacted.
    #[arg(long, default_value_t = 6)]
    retention_window: u64,

    /// Minimum tool result size (chars) worth compacting.
    #[arg(long, default_value_t = 2000)]
    compaction_threshold: usize,

    /// Nesting limit for delegated sub-sessions (0 disables delegation).
    #[arg(long, default_value_t = 2)]
    max_delegation_depth: u32,

    /// Directory for trusted_folders.json and profiles.json [default: ~/.keel].
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// OpenAI-compatible API base URL.
    #[arg(long)]
    api_base: Option<String>,

    /// Print a JSON summary instead of the final text.
    #[arg(long)]
    json: bool,

    /// More log output (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn to_config(&self) -> CodeConfig {
        let defaults = CodeConfig::default();
        let compaction = CompactionConfig::default()
            .with_interval(self.compaction_interval)
            .with_retention_window(self.retention_window)
            .with_size_threshold(self.compaction_threshold);
        CodeConfig {
            model: self.model.clone(),
            max_turns: self.max_turns,
            max_tokens: self.max_tokens,
            workdir: self.workdir.clone(),
            state_dir: self.state_dir.clone().unwrap_or(defaults.state_dir),
            profile: self.profile.clone(),
            compaction: if self.compaction_interval == 0 {
                Toggle::disabled()
            } else {
                Toggle::enabled(compaction)
            },
            delegation: DelegationConfig::default().with_max_depth(self.max_delegation_depth),
            api_base: self.api_base.clone(),
            ..defaults
        }
    }

    fn task(&self) -> keel_rs::Result<String> {
        let task = match &self.prompt {
            Some(p) => p.clone(),
            None => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .map_err(|e| EngineError::io("<stdin>", e))?;
                buf
            }
        };
        let task = task.trim().to_string();
        if task.is_empty() {
            return Err(EngineError::InvalidArguments(
                "no task given; pass --prompt or pipe one on stdin".into(),
            ));
        }
        Ok(task)
    }
}

fn api_key() -> keel_rs::Result<String> {
    ["KEEL_API_KEY", "OPENROUTER_KEY"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|k| !k.is_empty()))
        .ok_or_else(|| {
            EngineError::InvalidArguments("set KEEL_API_KEY or OPENROUTER_KEY".into())
        })
}

async fn run(cli: Cli) -> keel_rs::Result<SessionStatus> {
    let task = cli.task()?;
    let config = cli.to_config();

    let workspace = config.open_workspace()?;
    let profiles = config.load_profiles()?;
    let permissions = config.build_permissions(&profiles, workspace.root())?;
    if cli.trust {
        permissions.grant_trust()?;
    }

    let mut client = ChatClient::new(api_key()?)?;
    if let Some(base) = &config.api_base {
        client = client.with_api_base(base.clone());
    }
    let transport: Arc<dyn ModelTransport> = Arc::new(client);

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let interactive = !cli.non_interactive && std::io::stdin().is_terminal();
    let handler: Arc<dyn EventHandler> = Arc::new(
        CompositeEventHandler::new()
            .with(LoggingHandler)
            .with(
                ConsoleApprovalHandler::new(interactive)
                    .with_auto_confirm(cli.yes)
                    .with_trust(cli.trust),
            ),
    );

    let session_config = config.build_session_config();
    let dispatcher = Dispatcher::new(
        Arc::clone(&transport),
        Arc::clone(&workspace),
        &permissions,
        session_config.clone(),
    )
    .with_profiles(profiles)
    .with_config(config.delegation.clone())
    .with_cancel_flag(cancel.clone())
    .with_event_handler(Arc::clone(&handler));
    let usage_probe = dispatcher.clone();
    let tools = config.build_tool_set(&workspace, dispatcher);

    info!(
        "Working in {} with profile '{}'",
        workspace.root().display(),
        config.profile
    );
    let mut session = Session::new(transport.as_ref(), &tools, session_config, permissions)
        .with_event_handler(handler.as_ref())
        .with_cancel_flag(cancel);
    let outcome = session.run(&task).await;

    let mut usage = outcome.usage;
    usage.absorb(&usage_probe.usage());
    info!("{}", usage.summary());

    if cli.json {
        let summary = RunSummary::from(&outcome);
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| EngineError::persist("summary", e))?;
        println!("{json}");
    } else if !outcome.text.is_empty() {
        println!("{}", outcome.text);
    }
    if let Some(e) = &outcome.error {
        eprintln!("Error: {e}");
    }
    Ok(outcome.status)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli).await {
        Ok(status) => ExitCode::from(exit_code(status)),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}
