//! Article text extraction from arbitrary news pages.
//!
//! [`ContentExtractor::extract`] never fails: every error (network, HTTP
//! status, unparsable or empty HTML) degrades to an [`ExtractedArticle`]
//! with empty fields and `success == false`.
//!
//! # Fallback chain
//!
//! 1. Strip boilerplate elements from the parsed tree
//! 2. Per-host selectors, else the generic selector list; the first selector
//!    with matches longer than 100 chars wins
//! 3. The div/section/article with the most text (over 200 chars)
//! 4. Every `<p>` on the page
//!
//! Title, summary and metadata each have their own chains, see
//! [`extract_from_html`].

use super::http::Fetcher;
use super::selectors;
use crate::models::{ExtractedArticle, ExtractionMetadata};
use crate::utils::truncate_chars;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{info, instrument, warn};
use url::Url;

/// Title used when a page offers nothing better.
pub const UNKNOWN_TITLE: &str = "Unknown title";

const MIN_SELECTOR_TEXT: usize = 100;
const MIN_BLOCK_TEXT: usize = 200;
const MIN_TITLE_LEN: usize = 10;
const SUMMARY_TARGET: usize = 200;

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));
static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").expect("valid regex"));

/// Boilerplate phrases removed from extracted text, case-insensitive.
static NOISE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"点击.*?查看",
        r"更多.*?请.*?关注",
        r"本文.*?转载",
        r"声明.*?版权",
        r"Copyright.*?\d{4}",
        r"All rights reserved\.?",
        r"Subscribe.*?newsletter",
        r"Follow.*?Twitter",
        r"Like.*?Facebook",
        r"Share (?:this|on) (?:article|story|post|Facebook|Twitter|LinkedIn)",
    ]
    .iter()
    .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
    .collect()
});

/// Fetches pages and turns them into article text.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    max_length: usize,
}

impl ContentExtractor {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Fetch `url` and extract its article. Never returns an error.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn extract(&self, fetcher: &mut Fetcher, url: &str) -> ExtractedArticle {
        let html = match fetcher.get_text(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "Article fetch failed");
                return ExtractedArticle::failed();
            }
        };
        let article = extract_from_html(&html, url, self.max_length);
        if article.success {
            info!(
                title = %truncate_chars(&article.title, 50),
                chars = article.char_count,
                "Extracted article"
            );
        } else {
            warn!("Page yielded no article text");
        }
        article
    }

    /// Build an article from a body shipped inside the feed, when it holds
    /// any text.
    pub fn from_feed_body(&self, title: &str, html: &str) -> Option<ExtractedArticle> {
        let text = clean_content(&html_fragment_text(html));
        if text.is_empty() {
            return None;
        }
        let summary = truncate_chars(&text, SUMMARY_TARGET);
        Some(ExtractedArticle::new(
            title.to_string(),
            truncate_chars(&text, self.max_length),
            summary,
            None,
        ))
    }
}

/// Run the whole extraction chain over an already fetched page.
pub fn extract_from_html(html: &str, url: &str, max_length: usize) -> ExtractedArticle {
    let mut document = Html::parse_document(html);

    // Headers, bylines and tag lists are read before they are stripped.
    let title = extract_title(&document);
    let metadata = extract_metadata(&document);
    let description = meta_description(&document);

    strip_boilerplate(&mut document);

    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase));
    let content = extract_main_content(&document, host.as_deref());
    let summary = description.unwrap_or_else(|| summarize_sentences(&content));

    ExtractedArticle::new(
        title,
        truncate_chars(&content, max_length),
        summary,
        Some(metadata),
    )
}

/// Text of an HTML fragment, one trimmed text node per line.
pub fn html_fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    block_text(fragment.root_element())
}

fn block_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn compact_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

fn strip_boilerplate(document: &mut Html) {
    let doomed: Vec<_> = selectors::STRIP
        .iter()
        .flat_map(|sel| document.select(sel).map(|el| el.id()))
        .collect();
    for id in doomed {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn extract_title(document: &Html) -> String {
    let from_chain = selectors::TITLES.iter().find_map(|sel| {
        document
            .select(sel)
            .next()
            .map(compact_text)
            .filter(|t| t.chars().count() > MIN_TITLE_LEN)
    });
    from_chain
        .or_else(|| {
            document
                .select(&selectors::TITLE_TAG)
                .next()
                .map(compact_text)
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string())
}

fn extract_main_content(document: &Html, host: Option<&str>) -> String {
    for sel in selectors::content_chain(host) {
        let parts: Vec<String> = document
            .select(sel)
            .map(block_text)
            .filter(|t| t.chars().count() > MIN_SELECTOR_TEXT)
            .collect();
        if !parts.is_empty() {
            return clean_content(&parts.join("\n\n"));
        }
    }
    largest_block_or_paragraphs(document)
}

fn largest_block_or_paragraphs(document: &Html) -> String {
    let mut best: Option<(ElementRef<'_>, usize)> = None;
    for el in document.select(&selectors::BLOCKS) {
        let len = compact_text(el).chars().count();
        if len > MIN_BLOCK_TEXT && best.is_none_or(|(_, best_len)| len > best_len) {
            best = Some((el, len));
        }
    }
    if let Some((el, _)) = best {
        return clean_content(&block_text(el));
    }

    let paragraphs: Vec<String> = document
        .select(&selectors::PARAGRAPHS)
        .map(compact_text)
        .filter(|t| !t.is_empty())
        .collect();
    clean_content(&paragraphs.join("\n\n"))
}

/// Collapse whitespace runs and drop boilerplate phrases.
pub fn clean_content(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    let mut out = BLANK_LINES.replace_all(content, "\n\n").into_owned();
    out = SPACE_RUNS.replace_all(&out, " ").into_owned();
    for pattern in NOISE.iter() {
        out = pattern.replace_all(&out, "").into_owned();
    }
    out.trim().to_string()
}

fn meta_description(document: &Html) -> Option<String> {
    selectors::DESCRIPTIONS.iter().find_map(|sel| {
        document
            .select(sel)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty())
            .map(str::to_string)
    })
}

/// Greedy sentence summary: whole sentences while the total stays under
/// 200 chars.
fn summarize_sentences(content: &str) -> String {
    let mut summary = String::new();
    let mut count = 0;
    for sentence in split_sentences(content) {
        let len = sentence.chars().count();
        if count + len >= SUMMARY_TARGET {
            break;
        }
        summary.push_str(sentence);
        count += len;
    }
    let summary = summary.trim();
    if summary.is_empty() && !content.is_empty() {
        return truncate_chars(content.trim(), SUMMARY_TARGET);
    }
    summary.to_string()
}

/// Split on `。` and on `.` followed by whitespace, keeping the terminator.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = match c {
            '。' => Some(i + c.len_utf8()),
            '.' if chars.peek().is_some_and(|(_, next)| next.is_whitespace()) => Some(i + 1),
            _ => None,
        };
        if let Some(end) = end {
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn extract_metadata(document: &Html) -> ExtractionMetadata {
    let publish_time = selectors::TIMES
        .iter()
        .find_map(|sel| document.select(sel).next())
        .map(|el| {
            el.value()
                .attr("datetime")
                .map(|d| d.trim().to_string())
                .unwrap_or_else(|| compact_text(el))
        })
        .filter(|t| !t.is_empty());

    let author = selectors::AUTHORS
        .iter()
        .find_map(|sel| document.select(sel).next())
        .map(compact_text)
        .filter(|a| !a.is_empty());

    let tags = selectors::TAG_LINKS
        .iter()
        .map(|sel| {
            document
                .select(sel)
                .map(compact_text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .find(|tags| !tags.is_empty())
        .unwrap_or_default();

    ExtractionMetadata {
        author,
        publish_time,
        tags,
    }
}
