//! Poll-Ingest main entry point
//!
//! This is the command-line interface for the Poll-Ingest polling pipeline.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use poll_ingest::config::{load_config_with_hash, Config};
use poll_ingest::metrics::{self, MetricsRegistry};
use poll_ingest::output::{load_statistics, print_metrics, print_statistics};
use poll_ingest::scheduler::{shutdown_channel, CycleOutcome, Scheduler};
use poll_ingest::sources::{build_http_client, build_source_client};
use poll_ingest::storage::{open_storage, RecordStore, RunStatus, StoreHandle};
use poll_ingest::PollCursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Poll-Ingest: a polling ingestion pipeline
///
/// Poll-Ingest periodically fetches GitHub issues and StackExchange questions,
/// normalizes them, stores them idempotently in SQLite, and exposes
/// Prometheus counters about its progress.
#[derive(Parser, Debug)]
#[command(name = "poll-ingest")]
#[command(version)]
#[command(about = "A polling ingestion pipeline", long_about = None)]
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

    /// Validate config and show the first request of every source
    #[arg(long, conflicts_with_all = ["stats", "once"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "once"])]
    stats: bool,

    /// Run one cycle per source, print metrics and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_ingest(config, config_hash, cli.once).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("poll_ingest=info,warn"),
            1 => EnvFilter::new("poll_ingest=debug,info"),
            2 => EnvFilter::new("poll_ingest=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be fetched
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Poll-Ingest Dry Run ===\n");

    println!("Scheduler:");
    println!("  Poll interval: {}s", config.scheduler.poll_interval_secs);
    println!(
        "  Backoff: {}s initial, {}s max",
        config.scheduler.backoff_initial_secs, config.scheduler.backoff_max_secs
    );
    println!(
        "  Transient retries: {}",
        config.scheduler.max_transient_retries
    );
    println!("  Page size: {}", config.scheduler.page_size);

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Database: {}", config.output.database_path);
    match &config.metrics {
        Some(m) => println!("Metrics: http://{}/metrics", m.listen_addr),
        None => println!("Metrics: disabled"),
    }
    if let Some(embedding) = &config.embedding {
        println!("Embeddings: {} dimensions", embedding.dimension);
    }

    let http = build_http_client(&config.user_agent)?;
    let now = Utc::now();

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        let client = build_source_client(source, http.clone(), config.scheduler.page_size)?;
        let cursor = PollCursor::starting(source.days_back, now);
        println!(
            "  - {} [{}] {} every {}s",
            source.name,
            source.kind,
            client.target_label(),
            source.poll_interval(&config.scheduler).as_secs()
        );
        println!("    * {}", client.request_url(&cursor)?);
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))
        .context("failed to open database")?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main ingest operation
async fn handle_ingest(config: Config, config_hash: String, once: bool) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open database {}", config.output.database_path))?;
    let store = StoreHandle::new(storage);
    let run_id = store.call(move |s| s.create_run(&config_hash)).await?;
    tracing::info!("Starting ingest run {}", run_id);

    let result = run_pipeline(&config, store.clone(), once).await;

    let status = if result.is_ok() {
        RunStatus::Completed
    } else {
        RunStatus::Failed
    };
    if let Err(e) = store.call(move |s| s.finish_run(run_id, status)).await {
        tracing::error!("Failed to record run status: {}", e);
    }

    match &result {
        Ok(()) => tracing::info!("Ingest run {} finished", run_id),
        Err(e) => tracing::error!("Ingest run {} failed: {:#}", run_id, e),
    }
    result
}

async fn run_pipeline(config: &Config, store: StoreHandle, once: bool) -> anyhow::Result<()> {
    let registry = Arc::new(MetricsRegistry::new());
    metrics::describe_defaults(&registry);

    let record_store: Arc<dyn RecordStore> = Arc::new(store);
    let scheduler =
        Scheduler::from_config(config, Arc::clone(&record_store), Arc::clone(&registry)).await?;
    tracing::info!("Sources: {}", scheduler.source_names().join(", "));

    if once {
        for (name, outcome) in scheduler.run_once().await {
            match outcome {
                CycleOutcome::Completed {
                    stored, skipped, ..
                } => println!("{}: stored {}, skipped {}", name, stored, skipped),
                CycleOutcome::RateLimited { delay } | CycleOutcome::BackedOff { delay } => {
                    println!("{}: backing off for {:?}", name, delay)
                }
                CycleOutcome::Failed { error } => println!("{}: failed: {}", name, error),
            }
        }
        println!();
        print_metrics(&registry.snapshot());
        return Ok(());
    }

    let (trigger, signal) = shutdown_channel();

    let server = match &config.metrics {
        Some(metrics_config) => {
            let listener = TcpListener::bind(&metrics_config.listen_addr)
                .await
                .with_context(|| format!("failed to bind {}", metrics_config.listen_addr))?;
            let mut server_signal = trigger.signal();
            Some(tokio::spawn(metrics::server::serve(
                listener,
                Arc::clone(&registry),
                async move { server_signal.wait().await },
            )))
        }
        None => None,
    };

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
        tracing::info!("Shutting down");
        trigger.trigger();
    });

    let report = scheduler.run_until(signal).await;
    if report.aborted > 0 {
        tracing::warn!("{} sources were aborted mid-cycle", report.aborted);
    }

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Metrics server failed: {}", e),
            Err(e) => tracing::error!("Metrics server task failed: {}", e),
        }
    }

    let counts = record_store.count_by_source().await?;
    for (source, count) in counts {
        tracing::info!("{} records stored for {}", count, source);
    }

    if report.failed > 0 {
        anyhow::bail!("{} source workers stopped unexpectedly", report.failed);
    }
    Ok(())
}
