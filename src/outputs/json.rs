//! JSON report writer.
//!
//! One file per day, named after the report date. A second run on the same
//! day overwrites the earlier file.

use crate::models::DailyReport;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Path of the report for `report.date` inside `output_dir`.
pub fn report_path(report: &DailyReport, output_dir: &str) -> PathBuf {
    Path::new(output_dir).join(format!("{}.json", report.date.format("%Y-%m-%d")))
}

/// Write `report` as pretty-printed JSON to `{output_dir}/{YYYY-MM-DD}.json`.
///
/// Creates `output_dir` when it does not exist and returns the written path.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir))]
pub async fn write_report(
    report: &DailyReport,
    output_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    if let Err(e) = fs::create_dir_all(output_dir).await {
        error!(%output_dir, error = %e, "Failed to create output dir");
        return Err(e.into());
    }

    let path = report_path(report, output_dir);
    info!(path = %path.display(), "Writing JSON report");
    fs::write(&path, json).await?;
    info!(
        path = %path.display(),
        selected = report.stats.total_selected,
        "Wrote JSON report"
    );

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{base_time, selected};
    use crate::models::{CategorizedBuckets, CategorizedItem, Category, ImpactLevel, ReportStats};

    fn report() -> DailyReport {
        let mut categories = CategorizedBuckets::new();
        categories.push(CategorizedItem {
            entry: selected("Hospital network breached", "Attackers stole records."),
            category: Category::Incident,
            summary: "Records stolen.".to_string(),
            key_points: vec!["Source: Wire".to_string()],
            impact_level: ImpactLevel::High,
        });
        let stats = ReportStats {
            total_candidates: 3,
            ..ReportStats::from_buckets(&categories)
        };
        DailyReport {
            date: base_time().date_naive(),
            generated_at: base_time(),
            situation_summary: Some("Quiet day.".to_string()),
            categories,
            stats,
        }
    }

    #[tokio::test]
    async fn test_write_report_creates_dated_file() {
        let dir = std::env::temp_dir().join(format!("secbrief-json-{}", std::process::id()));
        let dir_str = dir.to_string_lossy().to_string();
        let report = report();

        let path = write_report(&report, &dir_str).await.unwrap();
        assert_eq!(path, dir.join("2025-07-20.json"));

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["date"], "2025-07-20");
        assert_eq!(value["situation_summary"], "Quiet day.");
        for key in ["Risk", "Incident", "Sentiment", "Trend"] {
            assert!(value["categories"][key].is_array(), "missing bucket {key}");
        }
        let item = &value["categories"]["Incident"][0];
        assert_eq!(item["impact_level"], "High");
        assert_eq!(item["entry"]["title"], "Hospital network breached");
        assert_eq!(value["stats"]["total_selected"], 1);
        assert_eq!(value["stats"]["total_candidates"], 3);
        assert_eq!(value["stats"]["sources"][0], "Wire");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
