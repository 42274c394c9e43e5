//! repo-harvest main entry point
//!
//! This is the command-line interface for the resumable catalog harvester.

use anyhow::Context;
use clap::Parser;
use repo_harvest::config::{load_config_with_hash, load_credential, validate, Config};
use repo_harvest::crawler::{run_harvest, ShutdownSignal, StopReason};
use repo_harvest::output::{load_statistics, print_statistics};
use repo_harvest::storage::{open_storage, Storage};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// repo-harvest: a resumable repository catalog harvester
///
/// repo-harvest pages through a GraphQL search API, stores every repository
/// with a daily popularity snapshot, and checkpoints its cursor after each
/// page so an interrupted harvest continues where it stopped.
#[derive(Parser, Debug)]
#[command(name = "repo-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable repository catalog harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Stop after this many records (overrides harvest.target-count)
    #[arg(long, value_name = "N")]
    total: Option<u64>,

    /// Records per page (overrides harvest.page-size)
    #[arg(long, value_name = "N")]
    page_size: Option<u32>,

    /// Checkpoint key to resume from (overrides harvest.checkpoint-key)
    #[arg(long, value_name = "KEY")]
    checkpoint_key: Option<String>,

    /// Clear the checkpoint and start from the first page
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    fresh: bool,

    /// Validate config and credential and show the plan without harvesting
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    apply_overrides(&mut config, &cli);
    validate(&config).context("invalid command-line override")?;

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_harvest(config, &config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("repo_harvest=info,warn"),
            1 => EnvFilter::new("repo_harvest=debug,info"),
            2 => EnvFilter::new("repo_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(total) = cli.total {
        config.harvest.target_count = total;
    }
    if let Some(page_size) = cli.page_size {
        config.harvest.page_size = page_size;
    }
    if let Some(key) = &cli.checkpoint_key {
        config.harvest.checkpoint_key = key.clone();
    }
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== repo-harvest Dry Run ===\n");

    println!("Harvest:");
    println!("  Search query: {}", config.harvest.search_query);
    println!("  Target count: {}", config.harvest.target_count);
    println!(
        "  Page size: {} (requested {})",
        config.harvest.effective_page_size(),
        config.harvest.page_size
    );
    println!("  Checkpoint key: {}", config.harvest.checkpoint_key);

    println!("\nUpstream:");
    println!("  Endpoint: {}", config.upstream.endpoint);
    println!("  User agent: {}", config.upstream.user_agent);
    println!("  Timeout: {}s", config.upstream.timeout_secs);
    match load_credential(&config.upstream) {
        Ok(_) => println!("  Credential: found in ${}", config.upstream.token_env),
        Err(e) => println!("  Credential: {}", e),
    }

    println!("\nPacing:");
    println!(
        "  Backoff: {}ms doubling up to {}ms (+ up to {}ms jitter)",
        config.retry.base_delay_ms, config.retry.max_delay_ms, config.retry.max_jitter_ms
    );
    println!(
        "  Quota: wait for reset below {}, {}ms pause below {}",
        config.quota.low_water_mark, config.quota.soft_pause_ms, config.quota.soft_threshold
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    let db_path = Path::new(&config.storage.database_path);
    if db_path.exists() {
        let storage = open_storage(db_path)?;
        match storage.read_checkpoint(&config.harvest.checkpoint_key)? {
            Some(cursor) => println!("  Would resume after cursor: {}", cursor),
            None => println!("  No checkpoint stored, would start from the first page"),
        }
    } else {
        println!("  Database does not exist yet, would start from the first page");
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    // Fail on a missing token before touching the database
    load_credential(&config.upstream)?;

    if fresh {
        let mut storage = open_storage(Path::new(&config.storage.database_path))?;
        if storage.clear_checkpoint(&config.harvest.checkpoint_key)? {
            tracing::info!(
                "Cleared checkpoint '{}', starting fresh",
                config.harvest.checkpoint_key
            );
        }
    }

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            signal.request();
        }
    });

    match run_harvest(config, config_hash, shutdown).await {
        Ok(outcome) => {
            if outcome.reason == StopReason::Shutdown {
                tracing::info!("Harvest interrupted; rerun to resume from the last checkpoint");
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
