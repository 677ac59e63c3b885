//! Data models for every stage of the news pipeline.
//!
//! Each stage produces its own record type and hands ownership of the
//! collection to the next stage:
//! - [`Source`]: a feed registered in the configuration
//! - [`RawEntry`]: one item read from a feed
//! - [`EnrichedEntry`]: a raw entry plus the article text pulled from its page
//! - [`UniqueEntry`]: the survivor of a dedup bucket
//! - [`SelectedEntry`]: one of the top-N stories kept for the brief
//! - [`CategorizedItem`]: a selected story filed under a [`Category`]
//!
//! [`DailyReport`] is the terminal artifact handed to the renderer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A registered news feed.
///
/// Sources are validated once at start-up (see [`crate::config`]) and are
/// shared by every entry read from them through an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Display name of the outlet.
    pub name: String,
    /// RSS or Atom endpoint.
    pub feed_url: String,
    /// Disabled sources stay in the registry but are never fetched.
    pub enabled: bool,
    /// Ranking weight in `0.5..=1.5`; higher sorts first.
    pub weight: f64,
    /// Language tag such as `zh` or `en`.
    pub language: String,
    /// Region tag such as `CN` or `US`.
    pub region: String,
    /// Free-form outlet category from the registry.
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One item read from a feed inside the recency window.
#[derive(Debug, Clone, Serialize)]
pub struct RawEntry {
    pub title: String,
    pub link: String,
    /// Feed summary with markup removed.
    pub summary: String,
    /// Inline article body (`content:encoded` / Atom `content`), still HTML.
    #[serde(skip)]
    pub body: Option<String>,
    pub published: DateTime<Utc>,
    pub source: Arc<Source>,
}

/// Optional facts scraped from an article page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ExtractionMetadata {
    pub fn is_empty(&self) -> bool {
        self.author.is_none() && self.publish_time.is_none() && self.tags.is_empty()
    }
}

/// Result of running the content extractor against one URL.
///
/// `success` is derived from the content: an article is only successful
/// when some body text was recovered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedArticle {
    pub title: String,
    pub content: String,
    pub summary: String,
    pub char_count: usize,
    pub word_count: usize,
    pub metadata: Option<ExtractionMetadata>,
    pub success: bool,
}

impl ExtractedArticle {
    pub fn new(
        title: String,
        content: String,
        summary: String,
        metadata: Option<ExtractionMetadata>,
    ) -> Self {
        Self {
            char_count: content.chars().count(),
            word_count: content.split_whitespace().count(),
            success: !content.is_empty(),
            title,
            content,
            summary,
            metadata: metadata.filter(|m| !m.is_empty()),
        }
    }

    /// The empty result every failure mode degrades to.
    pub fn failed() -> Self {
        Self::default()
    }
}

/// A raw entry together with whatever the extractor recovered for it.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedEntry {
    #[serde(flatten)]
    pub raw: RawEntry,
    pub extracted_title: String,
    pub body: String,
    /// Page summary, or the feed summary when the page offered none.
    pub enriched_summary: String,
    pub char_count: usize,
    pub word_count: usize,
    /// False only when `body` is empty.
    pub extracted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExtractionMetadata>,
}

impl EnrichedEntry {
    pub fn new(raw: RawEntry, article: ExtractedArticle) -> Self {
        let body = if article.success {
            article.content
        } else {
            String::new()
        };
        let enriched_summary = if article.summary.trim().is_empty() {
            raw.summary.clone()
        } else {
            article.summary
        };
        Self {
            extracted: !body.is_empty(),
            char_count: body.chars().count(),
            word_count: body.split_whitespace().count(),
            extracted_title: article.title,
            body,
            enriched_summary,
            metadata: article.metadata,
            raw,
        }
    }

    /// The title shown downstream: the page title wins when it is longer
    /// than the one in the feed.
    pub fn display_title(&self) -> &str {
        if self.extracted_title != crate::scrapers::article::UNKNOWN_TITLE
            && self.extracted_title.chars().count() > self.raw.title.chars().count()
        {
            &self.extracted_title
        } else {
            &self.raw.title
        }
    }

    pub fn source(&self) -> &Source {
        &self.raw.source
    }

    pub fn weight(&self) -> f64 {
        self.raw.source.weight
    }

    pub fn published(&self) -> DateTime<Utc> {
        self.raw.published
    }

    /// Body text when extraction worked, else the summary, cut to `max` chars.
    pub fn preview(&self, max: usize) -> String {
        let text = if self.body.is_empty() {
            &self.enriched_summary
        } else {
            &self.body
        };
        crate::utils::truncate_chars(text, max)
    }
}

/// Representative of a dedup bucket.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct UniqueEntry(EnrichedEntry);

impl UniqueEntry {
    pub(crate) fn new(entry: EnrichedEntry) -> Self {
        Self(entry)
    }
}

impl Deref for UniqueEntry {
    type Target = EnrichedEntry;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Why the model picked a story, when it did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionNote {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A unique entry kept in the top-N.
#[derive(Debug, Clone, Serialize)]
pub struct SelectedEntry {
    #[serde(flatten)]
    entry: UniqueEntry,
    /// Present only for stories matched from the model's picks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<SelectionNote>,
}

impl SelectedEntry {
    pub fn new(entry: UniqueEntry, note: Option<SelectionNote>) -> Self {
        Self { entry, note }
    }
}

impl Deref for SelectedEntry {
    type Target = EnrichedEntry;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

/// The four fixed buckets of the brief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Risk,
    Incident,
    Sentiment,
    Trend,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Risk,
        Category::Incident,
        Category::Sentiment,
        Category::Trend,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Risk => "Risk",
            Category::Incident => "Incident",
            Category::Sentiment => "Sentiment",
            Category::Trend => "Trend",
        }
    }

    /// Map a bucket label from a model response. Accepts the English names
    /// in any case and their Chinese labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "risk" | "安全风险" => Some(Category::Risk),
            "incident" | "安全事件" => Some(Category::Incident),
            "sentiment" | "安全舆情" => Some(Category::Sentiment),
            "trend" | "安全趋势" => Some(Category::Trend),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    /// Lenient label parsing; anything unrecognised is `Medium`.
    pub fn from_label(label: Option<&str>) -> Self {
        let Some(label) = label else {
            return ImpactLevel::Medium;
        };
        let label = label.trim().to_lowercase();
        if label.starts_with("high") || label.starts_with('高') {
            ImpactLevel::High
        } else if label.starts_with("low") || label.starts_with('低') {
            ImpactLevel::Low
        } else {
            ImpactLevel::Medium
        }
    }
}

/// A selected story filed under one category.
#[derive(Debug, Clone, Serialize)]
pub struct CategorizedItem {
    pub entry: SelectedEntry,
    pub category: Category,
    pub summary: String,
    pub key_points: Vec<String>,
    pub impact_level: ImpactLevel,
}

/// All four category buckets. Every key is always present, possibly empty.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct CategorizedBuckets {
    buckets: BTreeMap<Category, Vec<CategorizedItem>>,
}

impl Default for CategorizedBuckets {
    fn default() -> Self {
        Self {
            buckets: Category::ALL.iter().map(|c| (*c, Vec::new())).collect(),
        }
    }
}

impl CategorizedBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: CategorizedItem) {
        self.buckets.entry(item.category).or_default().push(item);
    }

    pub fn get(&self, category: Category) -> &[CategorizedItem] {
        self.buckets
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.buckets.keys().copied()
    }

    pub fn items(&self) -> impl Iterator<Item = &CategorizedItem> {
        self.buckets.values().flatten()
    }
}

/// Aggregate counts the renderer prints in the report header.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportStats {
    pub total_selected: usize,
    /// Unique candidates the selector chose from.
    pub total_candidates: usize,
    /// Feed items seen inside the recency window.
    pub total_ingested: usize,
    /// Items that passed the keyword filter.
    pub total_relevant: usize,
    /// Selected stories whose article body was extracted.
    pub enhanced_count: usize,
    pub total_chars: usize,
    pub sources: BTreeSet<String>,
    pub regions: BTreeSet<String>,
    pub languages: BTreeSet<String>,
}

impl ReportStats {
    pub fn from_buckets(buckets: &CategorizedBuckets) -> Self {
        let mut stats = ReportStats::default();
        for item in buckets.items() {
            let entry = &item.entry;
            stats.total_selected += 1;
            if entry.extracted {
                stats.enhanced_count += 1;
            }
            stats.total_chars += entry.char_count;
            stats.sources.insert(entry.source().name.clone());
            stats.regions.insert(entry.source().region.clone());
            stats.languages.insert(entry.source().language.clone());
        }
        stats
    }
}

/// The finished brief for one run.
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub situation_summary: Option<String>,
    pub categories: CategorizedBuckets,
    pub stats: ReportStats,
}

/// What a pipeline run produced.
#[derive(Debug)]
pub enum PipelineOutcome {
    Report(DailyReport),
    /// No source produced a relevant entry.
    NoNews,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_failed_extraction_has_no_body() {
        let src = source("Krebs", 1.2);
        let entry = EnrichedEntry::new(raw("Title here", &src, 1), ExtractedArticle::failed());
        assert!(!entry.extracted);
        assert!(entry.body.is_empty());
        assert_eq!(entry.enriched_summary, "Summary of Title here");
    }

    #[test]
    fn test_successful_extraction_counts() {
        let src = source("Krebs", 1.2);
        let entry = enriched("Title", "one two three", &src, 1);
        assert!(entry.extracted);
        assert_eq!(entry.word_count, 3);
        assert_eq!(entry.char_count, 13);
    }

    #[test]
    fn test_display_title_prefers_longer_page_title() {
        let src = source("Krebs", 1.2);
        let article = ExtractedArticle::new(
            "Phishers Target Aviation Execs to Scam Customers".to_string(),
            "body".to_string(),
            String::new(),
            None,
        );
        let entry = EnrichedEntry::new(raw("Phishers Target Aviation", &src, 1), article);
        assert_eq!(
            entry.display_title(),
            "Phishers Target Aviation Execs to Scam Customers"
        );

        let short = EnrichedEntry::new(raw("A long feed title", &src, 1), ExtractedArticle::failed());
        assert_eq!(short.display_title(), "A long feed title");
    }

    #[test]
    fn test_empty_metadata_is_dropped() {
        let article = ExtractedArticle::new(
            "t".into(),
            "c".into(),
            String::new(),
            Some(ExtractionMetadata::default()),
        );
        assert!(article.metadata.is_none());
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(Category::from_label("risk"), Some(Category::Risk));
        assert_eq!(Category::from_label(" Incident "), Some(Category::Incident));
        assert_eq!(Category::from_label("安全舆情"), Some(Category::Sentiment));
        assert_eq!(Category::from_label("安全趋势"), Some(Category::Trend));
        assert_eq!(Category::from_label("Politics"), None);
    }

    #[test]
    fn test_impact_labels() {
        assert_eq!(ImpactLevel::from_label(Some("High")), ImpactLevel::High);
        assert_eq!(ImpactLevel::from_label(Some("高")), ImpactLevel::High);
        assert_eq!(ImpactLevel::from_label(Some("low")), ImpactLevel::Low);
        assert_eq!(ImpactLevel::from_label(Some("中")), ImpactLevel::Medium);
        assert_eq!(ImpactLevel::from_label(None), ImpactLevel::Medium);
    }

    #[test]
    fn test_buckets_always_have_all_keys() {
        let buckets = CategorizedBuckets::new();
        assert_eq!(buckets.categories().count(), 4);
        assert!(buckets.is_empty());

        let json = serde_json::to_value(&buckets).unwrap();
        for category in Category::ALL {
            assert!(json.get(category.as_str()).is_some());
        }
    }

    #[test]
    fn test_stats_from_buckets() {
        let mut buckets = CategorizedBuckets::new();
        buckets.push(CategorizedItem {
            entry: selected("Ransomware hits hospital", "Body"),
            category: Category::Incident,
            summary: "s".into(),
            key_points: vec![],
            impact_level: ImpactLevel::High,
        });
        let stats = ReportStats::from_buckets(&buckets);
        assert_eq!(stats.total_selected, 1);
        assert_eq!(stats.enhanced_count, 1);
        assert_eq!(stats.total_chars, 4);
        assert!(stats.sources.contains("Wire"));
    }
}
