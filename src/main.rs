//! subreply - command line entry point

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use subreply::config::BotConfig;
use subreply::engine::{BotRunner, CycleEngine};
use subreply::forum::{reddit::RedditConfig, ForumClient, RedditClient};
use subreply::llm::{build_provider, LlmProvider};
use subreply::observability::{init_default_logging, metrics, StatusServer};
use subreply::store::{SqliteStore, StateStore};
use subreply::{Clock, SystemClock};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Transparent subreddit reply bot
#[derive(Parser)]
#[command(name = "subreply")]
#[command(about = "Scan subreddits and post disclosed, rate-limited product replies")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the status server until interrupted
    Run,
    /// Run a single cycle now and print its report
    Once,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Verify forum credentials, LLM access and the database
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose > 0);

    info!("Starting subreply v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bot(config).await,
        Commands::Once => run_once(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Check => check_connectivity(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>) -> CliResult<BotConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(BotConfig::load_from_file(path)?);
    }

    for candidate in ["subreply.toml", "config/subreply.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(BotConfig::load_from_file(path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create subreply.toml".into())
}

async fn open_store(config: &BotConfig) -> CliResult<Arc<dyn StateStore>> {
    let store = SqliteStore::open(Path::new(&config.storage.database_path)).await?;
    Ok(Arc::new(store))
}

fn build_forum(config: &BotConfig) -> CliResult<Arc<dyn ForumClient>> {
    let client = RedditClient::new(
        RedditConfig::from(&config.forum),
        config.forum_credentials()?,
    )?;
    Ok(Arc::new(client))
}

fn build_llm(config: &BotConfig) -> CliResult<Arc<dyn LlmProvider>> {
    Ok(build_provider(&config.llm, config.get_llm_api_key()?)?)
}

/// Wire the engine to its collaborators and restore persisted state
async fn build_engine(config: &BotConfig) -> CliResult<(CycleEngine, Arc<dyn StateStore>)> {
    let store = open_store(config).await?;
    let engine = CycleEngine::restore(config, build_forum(config)?, build_llm(config)?, store.clone())
        .await?;
    Ok((engine, store))
}

async fn run_bot(config: BotConfig) -> CliResult<()> {
    let collector = metrics();
    collector.set_runner_state("initializing");

    // Refuse to start when a configured control key cannot be resolved
    let api_key = config.status_api_key()?;
    if api_key.is_none() {
        warn!("No [status].api_key_env configured, control routes are unauthenticated");
    }

    let (engine, store) = build_engine(&config).await?;
    info!(
        bot = %config.bot.name,
        dry_run = engine.is_dry_run(),
        active = engine.is_active(),
        subreddits = ?config.forum.subreddits,
        window = %engine.active_hours().describe(),
        "Bot initialized"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (runner, handle) = BotRunner::new(
        engine,
        store.clone(),
        clock.clone(),
        Duration::from_secs(config.bot.scan_interval_secs),
        shutdown_rx.clone(),
    );

    let status_server = Arc::new(StatusServer::new(
        config.bot.name.clone(),
        config.status.port,
        handle.clone(),
        store,
        clock,
        api_key,
    ));
    let server_task = tokio::spawn(status_server.serve(shutdown_rx));
    let mut runner_task = tokio::spawn(runner.run());

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Bot is running");

    let runner_exited = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            false
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            false
        }
        result = &mut runner_task => {
            error!("Runner exited unexpectedly: {:?}", result);
            true
        }
    };

    collector.set_runner_state("stopping");
    // Receivers may already be gone when the runner exited on its own
    let _ = shutdown_tx.send(true);

    if !runner_exited {
        match runner_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Runner error during shutdown: {}", e),
            Err(e) => error!("Runner task failed: {}", e),
        }
    }
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Status server error: {}", e),
        Err(e) => error!("Status server task failed: {}", e),
    }
    drop(handle);

    collector.set_runner_state("stopped");
    info!("Shutdown complete");
    Ok(())
}

async fn run_once(config: BotConfig) -> CliResult<()> {
    let (mut engine, _store) = build_engine(&config).await?;
    let report = engine.run_manual(chrono::Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_config_command(config: &BotConfig, show: bool) -> CliResult<()> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn check_connectivity(config: &BotConfig) -> CliResult<()> {
    let forum = build_forum(config)?;
    let account = forum.identity().await?;
    println!("forum: authenticated as u/{account}");

    let provider = build_llm(config)?;
    provider.health_check().await?;
    println!("llm: {} ready (model {})", provider.name(), config.llm.model);

    let store = open_store(config).await?;
    store.migrate().await?;
    let recent = store.recent_activity(1).await?;
    match recent.first() {
        Some(last) => println!(
            "storage: {} ready, last processed post {} at {}",
            config.storage.database_path, last.post_id, last.processed_at
        ),
        None => println!("storage: {} ready, no posts processed yet", config.storage.database_path),
    }

    Ok(())
}
