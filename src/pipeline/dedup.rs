//! Cross-source duplicate removal keyed on a title prefix.

use crate::models::{EnrichedEntry, UniqueEntry};
use itertools::Itertools;
use tracing::info;

/// Number of leading title characters that identify a story.
pub const DEDUP_PREFIX_CHARS: usize = 50;

/// Lowercased first [`DEDUP_PREFIX_CHARS`] characters of `title`.
pub fn dedup_key(title: &str) -> String {
    title
        .chars()
        .take(DEDUP_PREFIX_CHARS)
        .collect::<String>()
        .to_lowercase()
}

/// Keep the first entry of every prefix bucket, in input order.
///
/// Syndicated copies whose titles differ only after the prefix collapse into
/// one; unrelated long titles that share a prefix are merged as well.
pub fn deduplicate(entries: Vec<EnrichedEntry>) -> Vec<UniqueEntry> {
    let before = entries.len();
    let unique: Vec<UniqueEntry> = entries
        .into_iter()
        .unique_by(|e| dedup_key(e.display_title()))
        .map(UniqueEntry::new)
        .collect();
    info!(before, after = unique.len(), "Deduplicated entries");
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{enriched, source};
    use std::collections::HashSet;

    const HEADLINE: &str = "Critical Zero-Day Found in Widely Used Library — Patch Now";

    #[test]
    fn test_syndicated_mirror_is_dropped() {
        let first = source("First", 1.0);
        let mirror = source("Mirror", 1.5);
        let out = deduplicate(vec![
            enriched(HEADLINE, "body", &first, 5),
            enriched(
                "Critical Zero-Day Found in Widely Used Library — Patch Immediately",
                "body",
                &mirror,
                1,
            ),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source().name, "First");
    }

    #[test]
    fn test_short_truncated_title_is_a_different_key() {
        // Shorter than the prefix, so the keys differ.
        let src = source("Wire", 1.0);
        let out = deduplicate(vec![
            enriched(HEADLINE, "body", &src, 5),
            enriched("Critical Zero-Day Found in Widely Use...", "body", &src, 1),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_key_is_case_insensitive_and_char_based() {
        assert_eq!(dedup_key("ABC"), "abc");
        let chinese = "某".repeat(60);
        assert_eq!(dedup_key(&chinese).chars().count(), DEDUP_PREFIX_CHARS);
        assert_eq!(dedup_key(HEADLINE), dedup_key(&HEADLINE.to_uppercase()));
    }

    #[test]
    fn test_first_occurrence_wins_and_order_is_kept() {
        let src = source("Wire", 1.0);
        let titles = ["B story", "A story", "b STORY", "C story", "a story"];
        let entries = titles
            .iter()
            .map(|t| enriched(t, "", &src, 1))
            .collect();
        let out: Vec<String> = deduplicate(entries)
            .iter()
            .map(|e| e.display_title().to_string())
            .collect();
        assert_eq!(out, vec!["B story", "A story", "C story"]);
    }

    #[test]
    fn test_fixed_point_and_distinct_keys() {
        let src = source("Wire", 1.0);
        let titles = [
            HEADLINE,
            "critical zero-day found in widely used library — patch it",
            "Ransomware hits hospital chain",
            "RANSOMWARE HITS HOSPITAL CHAIN",
            "New phishing kit",
        ];
        let entries: Vec<EnrichedEntry> = titles.iter().map(|t| enriched(t, "", &src, 1)).collect();
        let once = deduplicate(entries);
        let keys: HashSet<String> = once.iter().map(|e| dedup_key(e.display_title())).collect();
        assert_eq!(keys.len(), once.len());

        let again = deduplicate(once.iter().map(|e| (**e).clone()).collect());
        let titles_once: Vec<&str> = once.iter().map(|e| e.display_title()).collect();
        let titles_again: Vec<&str> = again.iter().map(|e| e.display_title()).collect();
        assert_eq!(titles_once, titles_again);
        assert_eq!(once.len(), 3);
    }
}
