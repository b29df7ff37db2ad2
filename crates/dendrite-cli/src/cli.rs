//! CLI entry and session setup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dendrite_core::config::{self, Config};
use dendrite_core::core::history::MessageHistory;
use dendrite_core::core::interrupt;
use dendrite_core::core::mcp::McpLifecycle;
use dendrite_core::core::session::{
    SessionState, shared_history, shared_session, shared_usage,
};
use dendrite_core::core::usage::UsageTracker;
use tracing_subscriber::EnvFilter;

use crate::engine;
use crate::repl::{self, ReplContext};

#[derive(Parser)]
#[command(name = "dendrite")]
#[command(version = "0.1")]
#[command(about = "Interactive session controller for a tool-using agent")]
struct Cli {
    /// Path to the config file (default: ${DENDRITE_HOME}/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the model from config for this session
    #[arg(short, long)]
    model: Option<String>,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    interrupt::init();
    let _log_guard = init_tracing()?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

/// Sends tracing output to ${DENDRITE_HOME}/dendrite.log so diagnostics never
/// mix into the interactive streams. The returned guard must stay alive for
/// the process's lifetime.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let path = config::paths::log_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();

    Ok(guard)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(config::paths::config_path);
    let config = Config::load_from(&config_path)?;
    let engine = engine::build(&config)?;
    tracing::info!(
        config = %config_path.display(),
        engine = engine.name(),
        servers = config.mcp_servers.len(),
        "session starting"
    );

    let working_dir = std::env::current_dir().context("resolve working directory")?;
    let mut history = MessageHistory::new();
    history.set_project_guide(config.load_guide(&working_dir)?);

    let model = cli.model.unwrap_or_else(|| config.default_model.clone());

    let ctx = ReplContext {
        engine,
        servers: Arc::new(McpLifecycle::new(config.server_list())),
        history: shared_history(history),
        usage: shared_usage(UsageTracker::new()),
        session: shared_session(SessionState::new(model)),
        config_path,
        working_dir,
    };

    repl::run(ctx).await
}
