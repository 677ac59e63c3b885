//! # secbrief
//!
//! A daily security-news brief: reads RSS/Atom feeds from a registry of
//! security outlets, keeps the security-relevant items from the last few
//! days, pulls the article text from each page, removes syndicated
//! duplicates, selects the most important stories and files them under
//! Risk, Incident, Sentiment and Trend.
//!
//! ## Usage
//!
//! ```sh
//! LLM_API_KEY=... secbrief -c config/sources.yaml -o ./reports
//! ```
//!
//! ## Architecture
//!
//! 1. **Ingestion**: fetch every enabled feed, keep items inside the recency window
//! 2. **Filtering**: drop items without any security keyword
//! 3. **Extraction**: fetch each article page and extract its text
//! 4. **Dedup**: one story per 50-character title prefix
//! 5. **Selection**: the model picks the top N; weight and date fill the rest
//! 6. **Categorization**: the model files each story; keywords cover the gaps
//! 7. **Output**: the report is written as `{output_dir}/{YYYY-MM-DD}.json`
//!
//! Without an API key every model step takes its deterministic fallback.

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod models;
mod outputs;
mod pipeline;
mod relevance;
mod scrapers;
mod utils;

use cli::Cli;
use config::AppConfig;
use models::PipelineOutcome;
use outputs::json;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("secbrief starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.config, ?args.output_dir, "Parsed CLI arguments");

    // ---- Load config ----
    let mut config = match AppConfig::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config, error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    args.apply_overrides(&mut config);

    if args.check_config {
        let stats = config.registry_stats();
        info!(
            total = stats.total,
            enabled = stats.enabled,
            high_priority = stats.high_priority,
            regions = ?stats.by_region,
            languages = ?stats.by_language,
            categories = ?stats.by_category,
            "Configuration is valid"
        );
        return Ok(());
    }

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Run the pipeline ----
    let llm = api::build_client(&config.llm)?;
    match pipeline::run(&config, &llm, Utc::now()).await? {
        PipelineOutcome::NoNews => {
            info!("No news today");
        }
        PipelineOutcome::Report(report) => {
            if let Err(e) = json::write_report(&report, &args.output_dir).await {
                error!(error = %e, "Failed to write JSON report");
                return Err(e);
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
