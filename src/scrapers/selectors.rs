//! CSS selector tables used by the article extractor.
//!
//! Each chain is plain ordered data: the extractor walks it front to back
//! and stops at the first selector that yields qualifying text.

use once_cell::sync::Lazy;
use scraper::Selector;
use std::collections::HashMap;

/// Content containers tried on hosts without their own rules.
pub const GENERIC_CONTENT: &[&str] = &[
    "article",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".content",
    ".main-content",
    ".article-body",
    ".post-body",
    "[role=\"main\"]",
    ".story-body",
    ".article-text",
    ".news-content",
];

/// Per-host content containers, matched on the exact lowercased host.
pub const DOMAIN_CONTENT: &[(&str, &[&str])] = &[
    ("www.anquanke.com", &[".article-content", ".post-content", ".content"]),
    ("www.freebuf.com", &[".article-content", ".post-content", ".content-detail"]),
    ("www.4hou.com", &[".article-content", ".post-content", ".detail-content"]),
    ("krebsonsecurity.com", &[".entry-content", ".post-content"]),
    ("thehackernews.com", &[".articlebody", ".story-content"]),
    ("www.bleepingcomputer.com", &[".articleBody", ".article_section"]),
    ("www.securityweek.com", &[".field-item", ".article-content"]),
    ("www.darkreading.com", &[".article-content", ".body-content"]),
    ("www.schneier.com", &[".entry-content", ".post-content"]),
];

/// Elements removed before any text is read.
pub const BOILERPLATE: &[&str] = &[
    "script",
    "style",
    "noscript",
    "nav",
    "header",
    "footer",
    "aside",
    "form",
    ".advertisement",
    ".ads",
    ".social-share",
    ".related-posts",
    ".comments",
    ".comment",
    ".sidebar",
    ".menu",
    ".navigation",
    ".breadcrumb",
    ".tags",
    ".author-info",
    ".share-buttons",
];

pub const TITLE: &[&str] = &[
    "h1.article-title",
    "h1.post-title",
    "h1.entry-title",
    "h1.title",
    ".article-header h1",
    ".post-header h1",
    "h1",
    "title",
];

pub const PUBLISH_TIME: &[&str] = &[
    "time[datetime]",
    ".publish-time",
    ".post-date",
    ".article-date",
    "[datetime]",
];

pub const AUTHOR: &[&str] = &[".author", ".byline", ".post-author", ".article-author"];

pub const TAGS: &[&str] = &[".tags a", ".post-tags a", ".article-tags a"];

pub const META_DESCRIPTION: &[&str] = &[
    "meta[name=\"description\"]",
    "meta[property=\"og:description\"]",
];

/// Compile a selector chain, keeping its order.
pub fn compile(chain: &[&str]) -> Vec<Selector> {
    chain.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

pub static GENERIC: Lazy<Vec<Selector>> = Lazy::new(|| compile(GENERIC_CONTENT));

pub static BY_DOMAIN: Lazy<HashMap<&'static str, Vec<Selector>>> = Lazy::new(|| {
    DOMAIN_CONTENT
        .iter()
        .map(|(host, chain)| (*host, compile(chain)))
        .collect()
});

pub static STRIP: Lazy<Vec<Selector>> = Lazy::new(|| compile(BOILERPLATE));
pub static TITLES: Lazy<Vec<Selector>> = Lazy::new(|| compile(TITLE));
pub static TIMES: Lazy<Vec<Selector>> = Lazy::new(|| compile(PUBLISH_TIME));
pub static AUTHORS: Lazy<Vec<Selector>> = Lazy::new(|| compile(AUTHOR));
pub static TAG_LINKS: Lazy<Vec<Selector>> = Lazy::new(|| compile(TAGS));
pub static DESCRIPTIONS: Lazy<Vec<Selector>> = Lazy::new(|| compile(META_DESCRIPTION));

pub static TITLE_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid selector"));
pub static BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div, section, article").expect("valid selector"));
pub static PARAGRAPHS: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("valid selector"));

/// Content chain for `host`: its own rules when registered, else generic.
pub fn content_chain(host: Option<&str>) -> &'static [Selector] {
    host.and_then(|h| BY_DOMAIN.get(h))
        .map(Vec::as_slice)
        .unwrap_or(GENERIC.as_slice())
}
