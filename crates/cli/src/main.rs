//! Aide CLI
//!
//! Main entry point for the aide command-line tool.
//! Runs a workspace assistant with tool access and a local embedding index.

mod commands;

use aide_core::{config::AppConfig, logging, AppResult};
use clap::{Parser, Subcommand};
use commands::{ChatCommand, IndexCommand, SearchCommand, StatsCommand, ToolCommand};
use std::path::PathBuf;

/// Aide - a workspace assistant with tools and embedding search
#[derive(Parser, Debug)]
#[command(name = "aide")]
#[command(about = "A workspace assistant with tools and embedding search", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "AIDE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "AIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with the assistant about the workspace
    Chat(ChatCommand),

    /// Build or update the embedding index
    Index(IndexCommand),

    /// Search the embedding index
    Search(SearchCommand),

    /// Run a single tool call locally
    Tool(ToolCommand),

    /// Show index statistics
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Workspace and config file decide which file is loaded
    let config = AppConfig::load_from(cli.workspace, cli.config)?;

    // Apply CLI overrides
    let config = config.with_overrides(cli.log_level, cli.verbose, cli.no_color);

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("Aide CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!(
        "Assistant provider: {}, embedding provider: {}",
        config.assistant.provider,
        config.embedding.provider
    );

    config.ensure_aide_dir()?;

    let command_name = match &cli.command {
        Commands::Chat(_) => "chat",
        Commands::Index(_) => "index",
        Commands::Search(_) => "search",
        Commands::Tool(_) => "tool",
        Commands::Stats(_) => "stats",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Chat(cmd) => cmd.execute(&config).await,
        Commands::Index(cmd) => cmd.execute(&config).await,
        Commands::Search(cmd) => cmd.execute(&config).await,
        Commands::Tool(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
