//! Linksweep main entry point
//!
//! This is the command-line interface for the Linksweep link scanner.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use linksweep::config::{load_config_with_hash, Config};
use linksweep::jobs::ScanJob;
use linksweep::orchestrator::Trigger;
use linksweep::proxy::CredentialCipher;
use linksweep::queue::ContentItem;
use linksweep::scan::{BatchReport, BatchRunner, RunOutcome};
use linksweep::state::LinkStatus;
use linksweep::storage::{open_storage, SqliteStorage, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Linksweep: a throttled dead-link and missing-image scanner
///
/// Linksweep checks the links and images of site content in small batches,
/// probing remote targets over HTTP and uploads on disk, and records what
/// is broken.
#[derive(Parser, Debug)]
#[command(name = "linksweep")]
#[command(version = "1.0.0")]
#[command(about = "A throttled dead-link and missing-image scanner", long_about = None)]
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

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full scan batch now, ignoring the rest window
    Scan {
        /// Batch to start from
        #[arg(long, default_value_t = 0)]
        batch: u32,
    },

    /// Run due batches, or start a delta scan when none is queued
    Tick,

    /// Show the latest scan status and finding counts
    Status,

    /// Import content items from a JSON file
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Encrypt a proxy password for the config file
    EncryptSecret {
        #[arg(value_name = "VALUE")]
        value: String,
    },

    /// Validate config and show the effective settings
    DryRun,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Scan { batch } => handle_scan(&config, batch).await?,
        Command::Tick => handle_tick(&config).await?,
        Command::Status => handle_status(&config)?,
        Command::Import { file } => handle_import(&config, &file)?,
        Command::EncryptSecret { value } => handle_encrypt_secret(&config, &value)?,
        Command::DryRun => handle_dry_run(&config),
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("linksweep=info,warn"),
            1 => EnvFilter::new("linksweep=debug,info"),
            2 => EnvFilter::new("linksweep=trace,debug"),
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

fn connect(config: &Config) -> anyhow::Result<Arc<SqliteStorage>> {
    let storage = open_storage(Path::new(&config.storage.database_path))
        .with_context(|| format!("Failed to open database {}", config.storage.database_path))?;
    Ok(Arc::new(storage))
}

/// Handles `scan`: one on-demand batch
async fn handle_scan(config: &Config, batch: u32) -> anyhow::Result<()> {
    let runner = BatchRunner::new(config, connect(config)?)?;
    let job = ScanJob::new(batch, true, Utc::now());

    let outcome = runner.run(Trigger::OnDemand, &job).await?;
    print_outcome(&outcome);

    if let RunOutcome::Rejected(e) = outcome {
        anyhow::bail!("Scan rejected: {}", e);
    }
    Ok(())
}

/// Handles `tick`: the recurring trigger, meant to be run from cron
async fn handle_tick(config: &Config) -> anyhow::Result<()> {
    let storage = connect(config)?;
    let runner = BatchRunner::new(config, storage.clone())?;

    let tick = runner.tick(storage.as_ref()).await?;
    if tick.started_delta {
        println!("Started a delta scan");
    } else if tick.outcomes.is_empty() && tick.failed.is_empty() {
        tracing::info!("No scan batches are due");
    }

    for outcome in &tick.outcomes {
        print_outcome(outcome);
    }
    for (job, e) in &tick.failed {
        println!("Batch {} failed: {}", job.batch_index, e);
    }

    if !tick.failed.is_empty() {
        anyhow::bail!("{} batch(es) failed", tick.failed.len());
    }
    Ok(())
}

/// Handles `status`: prints the snapshot, the job queue and finding counts
fn handle_status(config: &Config) -> anyhow::Result<()> {
    let storage = connect(config)?;

    println!("Database: {}\n", config.storage.database_path);

    match storage.load_status()? {
        Some(status) => {
            println!("State:          {}", status.state);
            println!("Batch:          {}", status.batch_index);
            println!("Full scan:      {}", status.is_full_scan);
            println!("Items scanned:  {}", status.items_scanned);
            println!("Links checked:  {}", status.links_checked);
            println!("Problems found: {}", status.broken_found);
            if let Some(started) = status.started_at {
                println!("Started:        {}", started);
            }
            if let Some(updated) = status.updated_at {
                println!("Updated:        {}", updated);
            }
            if let Some(error) = &status.last_error {
                println!("Last error:     {}", error);
            }
        }
        None => println!("No scan has run yet"),
    }

    match storage.last_check()? {
        Some(at) => println!("Last complete:  {}", at),
        None => println!("Last complete:  never"),
    }

    let pending = storage.pending_jobs()?;
    println!("\nPending batches ({}):", pending.len());
    for job in &pending {
        println!(
            "  - batch {} at {} (full: {})",
            job.batch_index, job.scheduled_at, job.is_full_scan
        );
    }

    let counts = storage.count_findings_by_status()?;
    println!("\nFindings:");
    for status in LinkStatus::all_statuses() {
        println!("  {:<13} {}", status.to_string(), counts.get(&status).copied().unwrap_or(0));
    }

    Ok(())
}

/// Handles `import`: upserts content items from a JSON array
fn handle_import(config: &Config, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let items: Vec<ContentItem> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid content items in {}", file.display()))?;

    let storage = connect(config)?;
    for item in &items {
        storage.upsert_content_item(item)?;
    }

    println!("✓ Imported {} content items", items.len());
    Ok(())
}

/// Handles `encrypt-secret`: prints an `enc:` value for a proxy password
fn handle_encrypt_secret(config: &Config, value: &str) -> anyhow::Result<()> {
    if config.site.secret.is_empty() {
        anyhow::bail!("site.secret must be set to encrypt credentials");
    }
    let cipher = CredentialCipher::from_secret(&config.site.secret);
    println!("{}", cipher.encrypt(value));
    Ok(())
}

/// Handles `dry-run`: shows what a scan would use
fn handle_dry_run(config: &Config) {
    println!("=== Linksweep Dry Run ===\n");

    println!("Site:");
    println!("  URL: {}", config.site.site_url);
    println!("  Uploads: {} -> {}", config.site.upload_base_url, config.site.upload_base_dir.display());
    println!("  Upload hosts: {}", config.site.upload_hosts.join(", "));
    println!("  Remote fetch: {}", config.site.allow_remote_fetch);
    println!("  Timezone: {}", config.site.timezone);

    println!("\nScan:");
    println!("  Batch size: {}", config.scan.batch_size);
    println!("  Batch delay: {}s", config.scan.batch_delay);
    println!("  Concurrency: {}", config.scan.concurrency);
    println!("  Method: {:?}", config.scan.scan_method);
    println!("  Content types: {}", config.scan.content_types.join(", "));

    println!("\nSchedule:");
    if config.schedule.rest_start == config.schedule.rest_end {
        println!("  Rest window: disabled");
    } else {
        println!(
            "  Rest window: {:02}:00-{:02}:00",
            config.schedule.rest_start, config.schedule.rest_end
        );
    }
    println!("  Load threshold: {:.2}", config.schedule.load_threshold);
    println!("  Lock timeout: {}s", config.schedule.lock_timeout);

    println!("\nHTTP:");
    println!("  Attempts: {}", config.http.max_attempts);
    println!("  Timeout: {}s", config.http.timeout_secs);
    println!("  Parallel: {}", config.http.parallel);

    println!("\nProxies ({}):", if config.proxy.enabled { "enabled" } else { "disabled" });
    for server in &config.proxy.servers {
        println!("  - {} [{}]", server.id, server.regions.join(", "));
    }

    println!("\nDatabase: {}", config.storage.database_path);
    println!("\n✓ Configuration is valid");
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Ran(report) => print_report(report),
        RunOutcome::Rescheduled {
            reason,
            job,
            scheduled,
        } => {
            if *scheduled {
                println!("Batch {} deferred ({}) until {}", job.batch_index, reason, job.scheduled_at);
            } else {
                println!("Batch {} deferred ({}) but could not be rescheduled", job.batch_index, reason);
            }
        }
        RunOutcome::Rejected(e) => println!("Scan not started: {}", e),
    }
}

fn print_report(report: &BatchReport) {
    println!(
        "Batch {}: {} items, {} candidates checked",
        report.job.batch_index,
        report.items_scanned,
        report.findings.len()
    );
    for finding in report.problems() {
        println!(
            "  [{}] item {} {} {}{}",
            finding.status,
            finding.item_id,
            finding.kind,
            finding.url,
            finding
                .http_status
                .map(|s| format!(" ({})", s))
                .unwrap_or_default()
        );
    }
}
