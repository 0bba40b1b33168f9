//! # blog_feeds
//!
//! Incremental acquisition and merge engine for blog post listings. Each
//! configured source is scraped page by page, its posts are merged into a
//! persistent per-source cache, and an RSS feed is regenerated from the
//! merged set.
//!
//! ## Usage
//!
//! ```sh
//! blog_feeds run            # incremental run over all sources
//! blog_feeds run --full     # re-walk every listing to its page bound
//! blog_feeds reset --source example
//! blog_feeds check
//! ```
//!
//! ## Architecture
//!
//! For each source:
//! 1. **Load**: read the cached snapshot (corrupt files are quarantined)
//! 2. **Paginate**: fetch and parse listing pages until a stop condition
//! 3. **Stamp**: resolve links and normalize dates, with deterministic
//!    fallbacks for dates that cannot be parsed
//! 4. **Merge**: dedupe by link against the cache and persist atomically
//! 5. **Output**: write the RSS feed and optional JSON export
//!
//! Sources run concurrently; a failing source never affects another.

use chrono::Utc;
use clap::Parser;
use futures::stream::{self, StreamExt};
use std::error::Error;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cache;
mod cli;
mod config;
mod dates;
mod errors;
mod health;
mod merge;
mod models;
mod orchestrator;
mod outputs;
mod pagination;
mod scrapers;
mod utils;

use cache::CacheStore;
use cli::{Cli, Command};
use config::{Config, SourceConfig};
use dates::DateNormalizer;
use models::{RunContext, RunMode};
use orchestrator::{FetchOrchestrator, RunReport, RunStatus};
use outputs::FeedWriter;
use outputs::json::JsonWriter;
use outputs::rss::RssWriter;
use scrapers::http::HttpAcquirer;
use scrapers::retry::RetryAcquirer;
use scrapers::selectors::SelectorParser;
use utils::ensure_writable_dir;

/// Exit code after Ctrl-C, matching shells' 128 + SIGINT.
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(config = %args.config.display(), command = ?args.command, "Parsed CLI arguments");

    let config = Config::load(&args.config).await?;

    match args.command {
        Command::Run {
            full,
            sources,
            concurrency,
            json_dir,
        } => {
            let mode = if full { RunMode::Full } else { RunMode::Incremental };
            run(&config, mode, &sources, concurrency, json_dir.as_deref()).await
        }
        Command::Reset { source } => reset(&config, &source).await,
        Command::Check { verbose, stale_days } => check(&config, verbose, stale_days).await,
    }
}

#[instrument(level = "info", skip_all, fields(%mode, concurrency))]
async fn run(
    config: &Config,
    mode: RunMode,
    only: &[String],
    concurrency: usize,
    json_dir: Option<&Path>,
) -> Result<ExitCode, Box<dyn Error>> {
    let start_time = std::time::Instant::now();

    if let Some(unknown) = only.iter().find(|id| config.source(id).is_none()) {
        return Err(format!("unknown source `{unknown}`").into());
    }
    let selected: Vec<&SourceConfig> = config
        .sources
        .iter()
        .filter(|s| only.is_empty() || only.contains(&s.id))
        .collect();

    // Early check: fail before any network traffic if outputs cannot be written.
    for dir in [config.cache_dir.as_path(), config.feeds_dir.as_path()]
        .into_iter()
        .chain(json_dir)
    {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir.display(), error = %e, "Directory is not writable");
            return Err(e.into());
        }
    }

    let rss = RssWriter::new(&config.feeds_dir);
    let json = json_dir.map(JsonWriter::new);
    info!(sources = selected.len(), "Starting run");

    let all_sources = stream::iter(selected)
        .map(|source| run_source(config, source, mode, &rss, json.as_ref()))
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<RunReport>>();

    let reports = tokio::select! {
        reports = all_sources => reports,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; caches and feeds written so far are complete");
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };

    for report in &reports {
        log_report(report);
    }
    let failed = reports.iter().filter(|r| r.status == RunStatus::Failure).count();
    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        sources = reports.len(),
        failed,
        "Execution complete"
    );

    Ok(if failed > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Run one source end to end. Never fails: every problem ends up in the
/// returned report.
#[instrument(level = "info", skip_all, fields(source_id = %source.id, %mode))]
async fn run_source(
    config: &Config,
    source: &SourceConfig,
    mode: RunMode,
    rss: &RssWriter,
    json: Option<&JsonWriter>,
) -> RunReport {
    let ctx = RunContext {
        source_id: source.id.clone(),
        mode,
    };

    let acquirer = match HttpAcquirer::new(source, &config.user_agent, config.request_timeout()) {
        Ok(http) => RetryAcquirer::new(http, config.max_retries, Duration::from_secs(1))
            .with_attempt_timeout(source.page_timeout()),
        Err(e) => {
            error!(error = %e, "Failed to build HTTP acquirer");
            return RunReport::failed(&ctx, Vec::new(), e.to_string());
        }
    };
    let parser = match SelectorParser::new(&source.selectors) {
        Ok(parser) => parser,
        Err(e) => {
            error!(error = %e, "Failed to build listing parser");
            return RunReport::failed(&ctx, Vec::new(), e.to_string());
        }
    };

    // The retry layer applies page_timeout per attempt; the driver's deadline
    // only has to outlast the whole retry sequence.
    let limits = source.pagination_limits().with_page_budget(acquirer.page_budget());
    info!(
        max_pages = source.max_pages(mode),
        url = %source.url,
        page_deadline = ?limits.page_timeout,
        "Fetching source"
    );
    let orchestrator = FetchOrchestrator::new(
        CacheStore::new(&config.cache_dir),
        acquirer,
        parser,
        DateNormalizer::new(&source.date_formats),
        limits,
    );
    let mut report = orchestrator.run(&ctx).await;

    if report.records.is_empty() {
        warn!("No records to publish; existing feed left as is");
        return report;
    }
    if let Err(e) = rss.write(source, &report.records).await {
        error!(error = %e, "Failed to write RSS feed");
        report.warnings.push(format!("feed not written: {e}"));
    }
    if let Some(json) = json {
        if let Err(e) = json.write(source, &report.records).await {
            error!(error = %e, "Failed to write JSON export");
            report.warnings.push(format!("JSON export not written: {e}"));
        }
    }
    report
}

fn log_report(report: &RunReport) {
    if report.status == RunStatus::Success {
        info!(
            source_id = %report.source_id,
            mode = %report.mode,
            pages = report.pages_fetched,
            new = report.new_records,
            total = report.records.len(),
            warnings = report.warnings.len(),
            "Source finished"
        );
    } else {
        warn!(
            source_id = %report.source_id,
            mode = %report.mode,
            status = %report.status,
            pages = report.pages_fetched,
            new = report.new_records,
            total = report.records.len(),
            error = report.error.as_deref().unwrap_or_default(),
            "Source finished with problems"
        );
    }
    for warning in &report.warnings {
        warn!(source_id = %report.source_id, %warning, "Run warning");
    }
}

#[instrument(level = "info", skip_all, fields(source_id = %source_id))]
async fn reset(config: &Config, source_id: &str) -> Result<ExitCode, Box<dyn Error>> {
    if config.source(source_id).is_none() {
        warn!("Source is not in the config; removing its cache anyway");
    }
    let removed = CacheStore::new(&config.cache_dir).reset(source_id).await?;
    if removed {
        info!("Cache removed; the next run starts from scratch");
    } else {
        info!("No cache to remove");
    }
    Ok(ExitCode::SUCCESS)
}

async fn check(config: &Config, verbose: bool, stale_days: i64) -> Result<ExitCode, Box<dyn Error>> {
    let dir = config.feeds_dir.as_path();
    let feeds = match health::check_feeds_dir(dir, Utc::now(), stale_days).await {
        Ok(feeds) => feeds,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            println!("Feeds directory not found: {}", dir.display());
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };
    if feeds.is_empty() {
        println!("No feed files found.");
        return Ok(ExitCode::FAILURE);
    }

    print!("{}", health::render_report(dir, &feeds, verbose));
    let failing = feeds
        .iter()
        .any(|f| f.status() == health::HealthStatus::Fail);
    Ok(if failing { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
