//! Four-way classification of the selected stories.
//!
//! One model call files every story under Risk, Incident, Sentiment or Trend
//! with a summary, key points and an impact level. Items in the reply are
//! mapped back to entries by their digest index, then by title. Whatever the
//! reply leaves out is classified by keyword, so every entry lands in exactly
//! one bucket even when the reply is partial or unreadable.

use crate::api::{CallKind, Complete, ParseError, parse_structured};
use crate::models::{
    CategorizedBuckets, CategorizedItem, Category, EnrichedEntry, ImpactLevel, SelectedEntry,
};
use crate::utils::truncate_chars;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt::Write;
use tracing::{debug, info, instrument, warn};

const EXCERPT_CHARS: usize = 500;
const FALLBACK_SUMMARY_CHARS: usize = 150;
const MAX_KEY_POINTS: usize = 4;

pub const NO_CONTENT: &str = "No content available.";

const INCIDENT_TERMS: &[&str] = &[
    "breach", "attack", "intrusion", "ransomware", "hack", "incident", "leak", "攻击", "泄露",
    "入侵", "勒索",
];
const RISK_TERMS: &[&str] = &[
    "vulnerability", "cve", "exploit", "zero-day", "threat", "risk", "漏洞", "威胁", "风险",
];
const SENTIMENT_TERMS: &[&str] = &[
    "policy", "regulation", "compliance", "report", "政策", "法规", "合规", "监管", "报告",
];

/// One item of the model's reply, before it is tied to an entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelItem {
    /// 1-based digest index; some models send it as a string.
    #[serde(default)]
    pub index: Option<Value>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub summary: String,
    /// A list of strings, or a single string.
    #[serde(default)]
    pub key_points: Value,
    #[serde(default)]
    pub impact_level: Option<String>,
}

impl ModelItem {
    fn position(&self) -> Option<usize> {
        let n = match self.index.as_ref()? {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (n as usize).checked_sub(1)
    }

    fn key_points(&self) -> Vec<String> {
        let raw: Vec<&str> = match &self.key_points {
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            Value::String(s) => vec![s.as_str()],
            _ => Vec::new(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .take(MAX_KEY_POINTS)
            .map(str::to_string)
            .collect()
    }
}

/// Read the category object out of a model reply.
///
/// Unknown keys are ignored, as are malformed items inside a known list. A
/// reply without any known category key is a shape error.
pub fn parse_categories(reply: &str) -> Result<Vec<(Category, ModelItem)>, ParseError> {
    let object: Map<String, Value> = parse_structured(reply)?;
    let mut found_key = false;
    let mut items = Vec::new();
    for (key, value) in object {
        let Some(category) = Category::from_label(&key) else {
            debug!(key = %key, "Ignoring unknown category key");
            continue;
        };
        found_key = true;
        let Value::Array(list) = value else {
            continue;
        };
        for raw in list {
            match serde_json::from_value::<ModelItem>(raw) {
                Ok(item) => items.push((category, item)),
                Err(e) => debug!(error = %e, "Skipping malformed category item"),
            }
        }
    }
    if !found_key {
        return Err(ParseError::Shape(
            "no Risk/Incident/Sentiment/Trend key in reply".to_string(),
        ));
    }
    Ok(items)
}

fn contains_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| text.contains(t))
}

/// Keyword classification over title, body and summary.
pub fn classify_by_keywords(entry: &EnrichedEntry) -> Category {
    let text = format!(
        "{} {} {}",
        entry.display_title(),
        entry.body,
        entry.enriched_summary
    )
    .to_lowercase();
    if contains_any(&text, INCIDENT_TERMS) {
        Category::Incident
    } else if contains_any(&text, RISK_TERMS) {
        Category::Risk
    } else if contains_any(&text, SENTIMENT_TERMS) {
        Category::Sentiment
    } else {
        Category::Trend
    }
}

fn fallback_summary(entry: &EnrichedEntry) -> String {
    let text = if entry.body.is_empty() {
        entry.enriched_summary.trim()
    } else {
        entry.body.trim()
    };
    if text.is_empty() {
        return NO_CONTENT.to_string();
    }
    let mut summary = truncate_chars(text, FALLBACK_SUMMARY_CHARS);
    if !summary.ends_with("...") {
        summary.push_str("...");
    }
    summary
}

fn provenance(entry: &EnrichedEntry) -> Vec<String> {
    vec![
        format!("Source: {}", entry.source().name),
        format!("Region: {}", entry.source().region),
    ]
}

fn keyword_item(entry: SelectedEntry) -> CategorizedItem {
    CategorizedItem {
        category: classify_by_keywords(&entry),
        summary: fallback_summary(&entry),
        key_points: provenance(&entry),
        impact_level: ImpactLevel::Medium,
        entry,
    }
}

/// Classify every entry by keyword alone.
pub fn categorize_by_keywords(selected: Vec<SelectedEntry>) -> CategorizedBuckets {
    let mut buckets = CategorizedBuckets::new();
    for entry in selected {
        buckets.push(keyword_item(entry));
    }
    buckets
}

fn titles_match(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

/// Index of the still unassigned entry a model item refers to.
fn resolve(item: &ModelItem, entries: &[Option<SelectedEntry>]) -> Option<usize> {
    let title = item.title.trim();
    if let Some(pos) = item.position() {
        if let Some(Some(entry)) = entries.get(pos) {
            if title.is_empty() || titles_match(entry.display_title(), title) {
                return Some(pos);
            }
        }
    }
    let mut first = None;
    for (i, slot) in entries.iter().enumerate() {
        let Some(entry) = slot else { continue };
        if !titles_match(entry.display_title(), title) {
            continue;
        }
        if item.source.as_deref().map(str::trim) == Some(entry.source().name.as_str()) {
            return Some(i);
        }
        first.get_or_insert(i);
    }
    first
}

/// Tie model items to entries; leftovers are classified by keyword.
pub fn assign(selected: Vec<SelectedEntry>, items: Vec<(Category, ModelItem)>) -> CategorizedBuckets {
    let mut slots: Vec<Option<SelectedEntry>> = selected.into_iter().map(Some).collect();
    let mut buckets = CategorizedBuckets::new();
    let mut from_model = 0;

    for (category, item) in items {
        let Some(entry) = resolve(&item, &slots).and_then(|i| slots[i].take()) else {
            debug!(title = %item.title, "Model item matches no remaining entry");
            continue;
        };
        let summary = match item.summary.trim() {
            "" => fallback_summary(&entry),
            s => s.to_string(),
        };
        let key_points = match item.key_points() {
            points if points.is_empty() => provenance(&entry),
            points => points,
        };
        buckets.push(CategorizedItem {
            category,
            summary,
            key_points,
            impact_level: ImpactLevel::from_label(item.impact_level.as_deref()),
            entry,
        });
        from_model += 1;
    }

    let leftovers: Vec<SelectedEntry> = slots.into_iter().flatten().collect();
    if !leftovers.is_empty() {
        warn!(
            count = leftovers.len(),
            "Model reply left entries out, classifying them by keyword"
        );
    }
    for entry in leftovers {
        buckets.push(keyword_item(entry));
    }
    info!(from_model, total = buckets.len(), "Categorization done");
    buckets
}

/// Digest of the selected stories with excerpts and metadata.
pub fn build_digest(selected: &[SelectedEntry]) -> String {
    let mut digest = String::new();
    for (i, entry) in selected.iter().enumerate() {
        let (quality, excerpt) = if entry.extracted {
            ("full article", truncate_chars(&entry.body, EXCERPT_CHARS))
        } else if !entry.enriched_summary.trim().is_empty() {
            ("feed summary", entry.enriched_summary.clone())
        } else {
            ("no content", "Content unavailable".to_string())
        };
        let _ = writeln!(
            digest,
            "{}. [{} - {}] {}",
            i + 1,
            entry.source().name,
            entry.source().region,
            entry.display_title()
        );
        let _ = writeln!(digest, "   Content quality: {quality} ({} chars)", entry.char_count);
        let _ = writeln!(digest, "   Content: {}", excerpt.replace('\n', " "));
        let _ = writeln!(digest, "   Language: {}", entry.source().language);
        if let Some(meta) = &entry.metadata {
            if let Some(author) = &meta.author {
                let _ = writeln!(digest, "   Author: {author}");
            }
            if let Some(time) = &meta.publish_time {
                let _ = writeln!(digest, "   Published: {time}");
            }
        }
    }
    digest
}

fn categorization_prompt(selected: &[SelectedEntry]) -> String {
    format!(
        "You are a cyber-security analyst. File each of the following stories \
         under exactly one of four categories:\n\
         - Risk: vulnerabilities, threat intelligence, risk assessments\n\
         - Incident: attacks, data breaches, intrusions, ransomware cases\n\
         - Sentiment: policy, regulation, compliance, industry reports, public opinion\n\
         - Trend: technology developments, industry moves, research\n\n\
         For each story write a summary (what happened, who is affected, impact \
         and response), 2 to 4 key points and an impact level (High, Medium or Low).\n\n\
         {digest}\n\
         Reply with JSON only, using every category key even when empty:\n\
         {{\"Risk\": [{{\"index\": 1, \"title\": \"story title\", \"source\": \"source name\", \
         \"region\": \"region\", \"summary\": \"...\", \"key_points\": [\"...\"], \
         \"impact_level\": \"High\"}}], \"Incident\": [], \"Sentiment\": [], \"Trend\": []}}",
        digest = build_digest(selected),
    )
}

/// Sort `selected` into the four buckets, each entry exactly once.
#[instrument(level = "info", skip_all, fields(selected = selected.len()))]
pub async fn categorize<L: Complete>(llm: &L, selected: Vec<SelectedEntry>) -> CategorizedBuckets {
    if selected.is_empty() {
        return CategorizedBuckets::new();
    }
    let prompt = categorization_prompt(&selected);
    let items = match llm.complete(CallKind::Categorization, &prompt).await {
        Ok(reply) => match parse_categories(&reply) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Unreadable categorization reply, using keywords");
                return categorize_by_keywords(selected);
            }
        },
        Err(e) => {
            warn!(error = %e, "Categorization call failed, using keywords");
            return categorize_by_keywords(selected);
        }
    };
    assign(selected, items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedLlm;
    use crate::models::fixtures::selected;
    use std::collections::HashSet;

    fn sample() -> Vec<SelectedEntry> {
        vec![
            selected(
                "Library flaw disclosed",
                "CVE-2025-0001 allows remote code execution and a public exploit is available.",
            ),
            selected("Hospital network breached", "Attackers stole patient records."),
            selected("New EU cyber regulation adopted", "The rules take effect next year."),
            selected("Quantum-safe TLS gains adoption", "Browsers ship hybrid key exchange."),
        ]
    }

    fn bucket_titles(buckets: &CategorizedBuckets, category: Category) -> Vec<String> {
        buckets
            .get(category)
            .iter()
            .map(|i| i.entry.display_title().to_string())
            .collect()
    }

    #[test]
    fn test_cve_with_exploit_is_risk() {
        let entry = selected(
            "Library flaw disclosed",
            "CVE-2025-0001 allows remote code execution and a public exploit is available.",
        );
        assert_eq!(classify_by_keywords(&entry), Category::Risk);
    }

    #[test]
    fn test_keyword_precedence() {
        assert_eq!(
            classify_by_keywords(&selected("Ransomware exploits CVE", "")),
            Category::Incident
        );
        assert_eq!(
            classify_by_keywords(&selected("监管机构发布新规", "")),
            Category::Sentiment
        );
        assert_eq!(classify_by_keywords(&selected("Weekly digest", "")), Category::Trend);
    }

    #[test]
    fn test_plain_risk_and_report_terms() {
        assert_eq!(
            classify_by_keywords(&selected("Supply chain risk grows", "")),
            Category::Risk
        );
        assert_eq!(
            classify_by_keywords(&selected("年度网络安全报告发布", "")),
            Category::Sentiment
        );
    }

    #[test]
    fn test_keyword_fallback_covers_input_exactly() {
        let input = sample();
        let expected: HashSet<String> =
            input.iter().map(|e| e.display_title().to_string()).collect();
        let buckets = categorize_by_keywords(input);

        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets.categories().count(), 4);
        let got: HashSet<String> = buckets
            .items()
            .map(|i| i.entry.display_title().to_string())
            .collect();
        assert_eq!(got, expected);

        assert_eq!(bucket_titles(&buckets, Category::Risk), vec!["Library flaw disclosed"]);
        assert_eq!(
            bucket_titles(&buckets, Category::Incident),
            vec!["Hospital network breached"]
        );
        let item = &buckets.get(Category::Trend)[0];
        assert_eq!(item.impact_level, ImpactLevel::Medium);
        assert_eq!(item.key_points, vec!["Source: Wire", "Region: US"]);
        assert_eq!(item.summary, "Browsers ship hybrid key exchange....");
    }

    #[test]
    fn test_fallback_summary_variants() {
        let long = selected("Long story", &"x".repeat(400));
        let summary = fallback_summary(&long);
        assert_eq!(summary.chars().count(), FALLBACK_SUMMARY_CHARS + 3);

        let mut empty = selected("Empty", "");
        assert_eq!(fallback_summary(&empty), "Summary of Empty...");
        // Only reachable through a SelectedEntry built from an empty feed item.
        let inner = {
            let mut e = (*empty).clone();
            e.enriched_summary.clear();
            e
        };
        empty = SelectedEntry::new(crate::models::UniqueEntry::new(inner), None);
        assert_eq!(fallback_summary(&empty), NO_CONTENT);
    }

    #[tokio::test]
    async fn test_failed_call_uses_keywords() {
        let llm = ScriptedLlm::failing();
        let buckets = categorize(&llm, sample()).await;
        assert_eq!(buckets.len(), 4);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_model_reply_with_partial_coverage() {
        let reply = r#"```json
{
  "Risk": [],
  "Incident": [
    {"index": 2, "title": "Hospital network breached", "summary": "Patient data stolen.",
     "key_points": ["Records exfiltrated", "Ransom demanded", "FBI notified", "Systems restored", "Extra"],
     "impact_level": "High"}
  ],
  "Sentiment": [
    {"title": "EU cyber regulation", "summary": "New obligations.", "key_points": "Applies to operators", "impact_level": "低"}
  ],
  "Trend": [
    {"title": "A story nobody sent", "summary": "Ignored."},
    "not an object"
  ],
  "Other": []
}
```"#;
        let llm = ScriptedLlm::new([Some(reply)]);
        let buckets = categorize(&llm, sample()).await;

        assert_eq!(buckets.len(), 4);
        let incident = &buckets.get(Category::Incident)[0];
        assert_eq!(incident.summary, "Patient data stolen.");
        assert_eq!(incident.key_points.len(), MAX_KEY_POINTS);
        assert_eq!(incident.impact_level, ImpactLevel::High);

        let sentiment = &buckets.get(Category::Sentiment)[0];
        assert_eq!(sentiment.entry.display_title(), "New EU cyber regulation adopted");
        assert_eq!(sentiment.key_points, vec!["Applies to operators"]);
        assert_eq!(sentiment.impact_level, ImpactLevel::Low);

        // Left out by the model, classified by keyword.
        assert_eq!(bucket_titles(&buckets, Category::Risk), vec!["Library flaw disclosed"]);
        assert_eq!(
            bucket_titles(&buckets, Category::Trend),
            vec!["Quantum-safe TLS gains adoption"]
        );

        let (kind, prompt) = llm.calls.borrow()[0].clone();
        assert_eq!(kind, CallKind::Categorization);
        assert!(prompt.contains("2. [Wire - US] Hospital network breached"));
        assert!(prompt.contains("Content quality: full article"));
    }

    #[tokio::test]
    async fn test_reply_without_category_keys_falls_back() {
        let llm = ScriptedLlm::new([Some(r#"{"stories": [{"title": "Hospital network breached"}]}"#)]);
        let buckets = categorize(&llm, sample()).await;
        assert_eq!(buckets.len(), 4);
        assert_eq!(
            bucket_titles(&buckets, Category::Incident),
            vec!["Hospital network breached"]
        );
    }

    #[test]
    fn test_same_source_preferred_on_title_ties() {
        let mut entries = vec![
            selected("Patch Tuesday roundup", "a"),
            selected("Patch Tuesday roundup for admins", "b"),
        ];
        let inner = {
            let mut e = (*entries[1]).clone();
            let mut src = (*e.raw.source).clone();
            src.name = "Krebs".to_string();
            e.raw.source = std::sync::Arc::new(src);
            e
        };
        entries[1] = SelectedEntry::new(crate::models::UniqueEntry::new(inner), None);
        let slots: Vec<Option<SelectedEntry>> = entries.into_iter().map(Some).collect();

        let item = ModelItem {
            title: "Patch Tuesday roundup".to_string(),
            source: Some("Krebs".to_string()),
            ..ModelItem::default()
        };
        assert_eq!(resolve(&item, &slots), Some(1));

        let item = ModelItem {
            source: None,
            ..item
        };
        assert_eq!(resolve(&item, &slots), Some(0));
    }

    #[tokio::test]
    async fn test_empty_selection_makes_no_call() {
        let llm = ScriptedLlm::failing();
        let buckets = categorize(&llm, Vec::new()).await;
        assert!(buckets.is_empty());
        assert_eq!(buckets.categories().count(), 4);
        assert_eq!(llm.call_count(), 0);
    }
}
