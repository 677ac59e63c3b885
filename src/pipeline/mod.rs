//! The daily run: ingest, filter, enrich, deduplicate, select, categorize.
//!
//! Every stage owns the collection it produces and hands it to the next one.
//! Sources and entries are processed one at a time through a single
//! [`Fetcher`]; nothing in here runs concurrently.

pub mod categorize;
pub mod dedup;
pub mod select;
pub mod summary;

use crate::api::Complete;
use crate::config::AppConfig;
use crate::models::{DailyReport, PipelineOutcome, RawEntry, ReportStats};
use crate::relevance::RelevanceFilter;
use crate::scrapers::article::ContentExtractor;
use crate::scrapers::enrich;
use crate::scrapers::feed::FeedIngestor;
use crate::scrapers::http::{FetchError, Fetcher, PolitenessDelay};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, instrument};

/// Run every stage for `now` and build the report.
///
/// Only building the HTTP client can fail; feed, page and model failures are
/// absorbed by the stage that sees them.
#[instrument(level = "info", skip_all, fields(date = %now.date_naive()))]
pub async fn run<L: Complete>(
    config: &AppConfig,
    llm: &L,
    now: DateTime<Utc>,
) -> Result<PipelineOutcome, FetchError> {
    let settings = &config.pipeline;
    let mut fetcher = Fetcher::new(
        Duration::from_secs(settings.request_timeout_secs),
        PolitenessDelay::new(
            Duration::from_millis(settings.min_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        ),
    )?;
    let ingestor = FeedIngestor::new(settings.window_days);
    let relevance = RelevanceFilter::with_extra(&settings.extra_keywords);
    let extractor = ContentExtractor::new(settings.max_content_length);

    let mut total_ingested = 0;
    let mut relevant: Vec<RawEntry> = Vec::new();
    for source in config.enabled_sources() {
        let entries = ingestor.ingest(&mut fetcher, source, now).await;
        total_ingested += entries.len();
        relevant.extend(entries.into_iter().filter(|e| relevance.is_relevant(e)));
    }
    let total_relevant = relevant.len();
    info!(total_ingested, total_relevant, "Ingestion finished");
    if relevant.is_empty() {
        return Ok(PipelineOutcome::NoNews);
    }

    let enriched = enrich(&mut fetcher, &extractor, relevant, settings.prefer_feed_body).await;
    let unique = dedup::deduplicate(enriched);
    let total_candidates = unique.len();
    let selected = select::select_top(llm, unique, settings.top_n).await;

    let situation_summary = if config.llm.situation_summary {
        summary::situation_summary(llm, &selected).await
    } else {
        None
    };
    let categories = categorize::categorize(llm, selected).await;

    let stats = ReportStats {
        total_candidates,
        total_ingested,
        total_relevant,
        ..ReportStats::from_buckets(&categories)
    };
    info!(
        selected = stats.total_selected,
        enhanced = stats.enhanced_count,
        sources = stats.sources.len(),
        "Report assembled"
    );
    Ok(PipelineOutcome::Report(DailyReport {
        date: now.date_naive(),
        generated_at: now,
        situation_summary,
        categories,
        stats,
    }))
}
