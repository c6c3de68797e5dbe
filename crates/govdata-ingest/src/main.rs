//! govdata-ingest - load a data.gov.uk dataset into Postgres

use anyhow::{Context, Result};
use clap::Parser;
use govdata_common::logging::{init_logging, LogConfig, LogLevel};
use govdata_ingest::config::{DatabaseSettings, IngestConfig, LoadMode, TerminationPolicy};
use govdata_ingest::datasets::{Dataset, DatasetLoader, LoadReport};
use govdata_ingest::engine::PageFetcher;
use govdata_ingest::store::{health_check, MemoryStore, PgRecordStore, RecordStore};
use std::future::Future;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit status after Ctrl-C, as a shell reports SIGINT
const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "govdata-ingest")]
#[command(author, version, about = "Load data.gov.uk reference datasets into Postgres")]
struct Cli {
    /// Dataset to load: postcodes, schools or exam-results
    dataset: Option<String>,

    /// Fetch the dataset's record sources concurrently
    #[arg(long)]
    concurrent: bool,

    /// Fail when a page after the first one fails, instead of treating it
    /// as the end of the data
    #[arg(long)]
    strict: bool,

    /// Records requested per page (and per transaction for bulk files)
    #[arg(long)]
    page_size: Option<usize>,

    /// Load into an in-memory store instead of the database
    #[arg(long)]
    dry_run: bool,

    /// Print the load report to stdout as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("govdata-ingest")
        .build()
        .merge_env();

    let _guard = match log_config.and_then(|config| init_logging(&config)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    let json = cli.json;
    tokio::select! {
        result = run(cli) => match result {
            Ok(report) => {
                log_summary(&report);
                if json {
                    if let Err(e) = print_report(&report) {
                        error!(error = %e, "Failed to write load report");
                        return ExitCode::FAILURE;
                    }
                }
                ExitCode::SUCCESS
            },
            Err(e) => {
                error!(error = %format!("{:#}", e), "Load failed");
                ExitCode::FAILURE
            },
        },
        _ = interrupted(tokio::signal::ctrl_c()) => {
            warn!("Interrupted; pages committed so far are kept");
            ExitCode::from(INTERRUPTED)
        },
    }
}

async fn run(cli: Cli) -> Result<LoadReport> {
    let dataset: Dataset = cli.dataset.as_deref().unwrap_or_default().parse()?;

    let mut config = IngestConfig::from_env()?;
    if let Some(page_size) = cli.page_size {
        config.page_size = page_size;
    }
    if cli.strict {
        config.termination = TerminationPolicy::Strict;
    }
    if cli.concurrent {
        config.load_mode = LoadMode::Concurrent;
    }
    config.validate()?;

    let store: Arc<dyn RecordStore> = if cli.dry_run {
        info!("Dry run, records go to an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let settings = DatabaseSettings::from_env()
            .context("Unable to get database connection settings")?;
        info!(url = %settings.redacted_url(), "Connecting to database");

        let store = PgRecordStore::connect(&settings)
            .await
            .context("Error opening database connection")?;
        health_check(store.pool()).await?;
        Arc::new(store)
    };

    info!(
        %dataset,
        page_size = config.page_size,
        termination = ?config.termination,
        mode = ?config.load_mode,
        "Starting load"
    );

    let fetcher = PageFetcher::from_config(&config, store)?;
    let report = DatasetLoader::new(fetcher, config.load_mode)
        .load(dataset, &config.urls)
        .await?;

    Ok(report)
}

fn log_summary(report: &LoadReport) {
    for source in &report.sources {
        info!(
            source = %source.name,
            total = source.report.total,
            pages = source.report.pages,
            inserted = source.report.inserted,
            updated = source.report.updated,
            skipped = source.report.skipped,
            "Source loaded"
        );
    }
    info!(dataset = %report.dataset, total = report.total(), "Ingestion complete");
}

fn print_report(report: &LoadReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize load report")?;
    println!("{}", json);
    Ok(())
}

/// Resolves when `signal` reports Ctrl-C. If the handler cannot be
/// installed the error is logged and this never resolves, so the load runs
/// on without one.
async fn interrupted(signal: impl Future<Output = io::Result<()>>) {
    if let Err(e) = signal.await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}
