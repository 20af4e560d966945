//! Sumi-Probe main entry point
//!
//! This is the command-line interface for the Sumi-Probe scan engine.

use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_probe::config::{load_config_with_hash, Config};
use sumi_probe::output::{load_statistics, print_report, print_statistics};
use sumi_probe::storage::{ScanStore, SqliteStore};
use sumi_probe::{normalize_url, Orchestrator, ScanContext, ScanStatus};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Probe: a polite scan engine
///
/// Sumi-Probe crawls a target while respecting robots.txt and per-host rate
/// limits, and records the pages, forms and technologies it finds.
#[derive(Parser, Debug)]
#[command(name = "sumi-probe")]
#[command(version = "1.0.0")]
#[command(about = "A polite scan orchestration and crawling engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Seed URL of the scan
    #[arg(value_name = "TARGET", required_unless_present_any = ["stats", "dry_run"])]
    target: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be scanned without scanning
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show stored results of a past scan and exit
    #[arg(long, value_name = "SCAN_ID", conflicts_with = "dry_run")]
    stats: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, cli.target.as_deref())
    } else if let Some(scan_id) = cli.stats {
        handle_stats(&config, scan_id)
    } else {
        let target = cli
            .target
            .ok_or_else(|| anyhow!("a TARGET URL is required"))?;
        handle_scan(config, &target).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_probe=info,warn"),
            1 => EnvFilter::new("sumi_probe=debug,info"),
            2 => EnvFilter::new("sumi_probe=trace,debug"),
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

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config, target: Option<&str>) -> anyhow::Result<()> {
    println!("=== Sumi-Probe Dry Run ===\n");

    let scan = &config.scan;
    println!("Scan Configuration:");
    println!("  Max depth: {}", scan.max_depth);
    println!("  Max pages: {}", scan.max_pages);
    println!("  Requests per second: {}", scan.requests_per_second);
    println!("  Timeout: {}s", scan.timeout);
    println!("  Follow redirects: {}", scan.follow_redirects);
    println!("  Respect robots.txt: {}", scan.respect_robots);
    println!("  User agent: {}", scan.user_agent);

    let engine = &config.engine;
    println!("\nEngine:");
    println!("  Workers: {}", engine.workers);
    println!("  Max body: {} bytes", engine.max_body_bytes);
    println!("  Max redirects: {}", engine.max_redirects);
    println!("  Link scope: {:?}", engine.link_scope);
    println!("  Robots failure policy: {:?}", engine.robots_failure);
    println!("  Robots TTL: {}s", engine.robots_ttl);
    println!("  Max crawl delay: {}s", engine.max_crawl_delay);

    println!("\nRetry:");
    println!("  Attempts: {}", config.retry.attempts);
    println!("  Base delay: {}ms", config.retry.base_delay);
    println!("  Multiplier: {}", config.retry.multiplier);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    let context = ScanContext::from_config(config)?;
    println!(
        "\nSignatures: {} ({})",
        context.signatures().len(),
        config
            .fingerprints
            .signatures_path
            .as_deref()
            .unwrap_or("built-in")
    );

    println!("\n✓ Configuration is valid");
    if let Some(target) = target {
        let seed = normalize_url(target)?;
        println!("✓ Would start scanning at {}", seed);
    }

    Ok(())
}

/// Handles the --stats mode: shows stored results of one scan
fn handle_stats(config: &Config, scan_id: i64) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = SqliteStore::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store, scan_id)?;
    print_statistics(&stats);

    Ok(())
}

/// Runs one scan against `target`
async fn handle_scan(config: Config, target: &str) -> anyhow::Result<()> {
    let seed = normalize_url(target).with_context(|| format!("invalid target {}", target))?;

    let store: Arc<dyn ScanStore> =
        Arc::new(SqliteStore::new(Path::new(&config.output.database_path))?);
    let context = Arc::new(ScanContext::from_config(&config)?);

    let job = store.create_job(&seed)?;
    tracing::info!("Created scan {} for {}", job.id, seed);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling scan");
                cancel.cancel();
            }
        });
    }

    let orchestrator = Orchestrator::new(context, store);
    let report = orchestrator.run(job, config.scan, cancel).await?;

    print_report(&report);

    if report.status == ScanStatus::Failed {
        return Err(anyhow!(
            "scan {} failed: {}",
            report.scan_id,
            report.failure.as_deref().unwrap_or("unknown reason")
        ));
    }

    Ok(())
}
