//! RSS 2.0, RSS 1.0 (RDF) and Atom feed ingestion.
//!
//! Parsing goes through `quick_xml`'s serde support into one small struct set
//! per dialect; [`parse_feed`] sniffs the root element to pick the dialect and
//! normalises every item into a [`FeedItem`].

use super::http::Fetcher;
use super::inline_text;
use crate::models::{RawEntry, Source};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::escape::{escape, resolve_html5_entity};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed XML: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("feed does not match its dialect: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("unrecognised feed root element <{0}>")]
    UnknownFormat(String),
    #[error("document has no root element")]
    Empty,
}

/// One item as read from a feed, before any filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    /// Summary text with markup removed.
    pub summary: String,
    /// Full inline content, still HTML.
    pub body: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

/// RSS 1.0 keeps its items next to the channel, directly under the root.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    /// `<dc:date>`; the deserializer matches local names only.
    #[serde(rename = "date")]
    dc_date: Option<String>,
    updated: Option<String>,
    /// `<content:encoded>`
    #[serde(rename = "encoded")]
    content_encoded: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl From<RssItem> for FeedItem {
    fn from(item: RssItem) -> Self {
        let published = [item.pub_date, item.dc_date, item.updated]
            .into_iter()
            .flatten()
            .find_map(|raw| parse_feed_date(&raw));
        FeedItem {
            title: clean_title(item.title.as_deref()),
            link: item.link.map(|l| l.trim().to_string()).unwrap_or_default(),
            summary: item.description.as_deref().map(inline_text).unwrap_or_default(),
            body: item.content_encoded.filter(|b| !b.trim().is_empty()),
            published,
        }
    }
}

impl From<AtomEntry> for FeedItem {
    fn from(entry: AtomEntry) -> Self {
        let link = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
            .or_else(|| entry.links.first())
            .and_then(|l| l.href.as_deref())
            .map(|h| h.trim().to_string())
            .unwrap_or_default();
        let published = [entry.published, entry.updated]
            .into_iter()
            .flatten()
            .find_map(|raw| parse_feed_date(&raw));
        FeedItem {
            title: clean_title(entry.title.as_ref().map(|t| t.value.as_str())),
            link,
            summary: entry
                .summary
                .as_ref()
                .map(|s| inline_text(&s.value))
                .unwrap_or_default(),
            body: entry.content.map(|c| c.value).filter(|b| !b.trim().is_empty()),
            published,
        }
    }
}

fn clean_title(raw: Option<&str>) -> String {
    raw.map(inline_text).unwrap_or_default()
}

/// Parse a feed timestamp: RFC 2822, RFC 3339, then a bare
/// `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

static NAMED_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").expect("valid regex"));

/// Rewrite HTML named entities, which plain XML rejects, as the characters
/// they stand for. Unknown names are escaped so the document still parses.
fn scrub_html_entities(s: &str) -> Cow<'_, str> {
    NAMED_ENTITY.replace_all(s, |caps: &Captures| {
        let name = &caps[1];
        match name {
            "amp" | "lt" | "gt" | "quot" | "apos" => caps[0].to_string(),
            _ => match resolve_html5_entity(name) {
                Some(resolved) => escape(resolved).into_owned(),
                None => format!("&amp;{name};"),
            },
        }
    })
}

fn root_name(xml: &str) -> Result<String, FeedError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::Eof => return Err(FeedError::Empty),
            _ => {}
        }
    }
}

/// Parse an RSS 2.0, RSS 1.0 or Atom document.
pub fn parse_feed(body: &str) -> Result<Vec<FeedItem>, FeedError> {
    let xml = scrub_html_entities(body);
    let items = match root_name(&xml)?.as_str() {
        "rss" => {
            let rss: Rss = quick_xml::de::from_str(&xml)?;
            rss.channel.items.into_iter().map(FeedItem::from).collect()
        }
        "RDF" => {
            let rdf: Rdf = quick_xml::de::from_str(&xml)?;
            rdf.items.into_iter().map(FeedItem::from).collect()
        }
        "feed" => {
            let atom: AtomFeed = quick_xml::de::from_str(&xml)?;
            atom.entries.into_iter().map(FeedItem::from).collect()
        }
        other => return Err(FeedError::UnknownFormat(other.to_string())),
    };
    Ok(items)
}

/// Reads one source's feed into raw entries inside the recency window.
#[derive(Debug, Clone)]
pub struct FeedIngestor {
    window_days: i64,
}

impl FeedIngestor {
    pub fn new(window_days: i64) -> Self {
        Self { window_days }
    }

    /// Fetch and parse `source`. Failures are logged and yield no entries.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    pub async fn ingest(
        &self,
        fetcher: &mut Fetcher,
        source: &Arc<Source>,
        now: DateTime<Utc>,
    ) -> Vec<RawEntry> {
        let body = match fetcher.get_text(&source.feed_url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, url = %source.feed_url, "Feed fetch failed");
                return Vec::new();
            }
        };
        let items = match parse_feed(&body) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, url = %source.feed_url, "Feed parse failed");
                return Vec::new();
            }
        };
        let total = items.len();
        let entries: Vec<RawEntry> = self.window(items, source, now).collect();
        info!(total, recent = entries.len(), "Feed ingested");
        entries
    }

    /// Keep complete items whose publish date is at most `window_days`
    /// calendar days before `now`.
    pub fn window<'a>(
        &'a self,
        items: Vec<FeedItem>,
        source: &'a Arc<Source>,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = RawEntry> + 'a {
        let today = now.date_naive();
        items.into_iter().filter_map(move |item| {
            let Some(published) = item.published else {
                debug!(title = %item.title, "Dropping item without a timestamp");
                return None;
            };
            if item.title.is_empty() || item.link.is_empty() {
                return None;
            }
            if (today - published.date_naive()).num_days() > self.window_days {
                return None;
            }
            Some(RawEntry {
                title: item.title,
                link: item.link,
                summary: item.summary,
                body: item.body,
                published,
                source: Arc::clone(source),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{base_time, source};
    use crate::scrapers::http::PolitenessDelay;
    use chrono::TimeZone;
    use std::time::Duration;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Krebs on Security</title>
    <link>https://krebsonsecurity.com</link>
    <item>
      <title>Ransomware gang hits airline&nbsp;systems</title>
      <link>https://krebsonsecurity.com/2025/07/ransomware-airline/</link>
      <pubDate>Sat, 19 Jul 2025 14:30:00 +0000</pubDate>
      <description><![CDATA[<p>An <b>extortion</b> crew claims the breach.</p>]]></description>
      <content:encoded><![CDATA[<p>Full story body.</p>]]></content:encoded>
      <category>Ransomware</category>
    </item>
    <item>
      <title>Item with only dc:date</title>
      <link>https://krebsonsecurity.com/2025/07/dc-date/</link>
      <dc:date>2025-07-18T08:00:00Z</dc:date>
    </item>
    <item>
      <title>No date at all</title>
      <link>https://krebsonsecurity.com/2025/07/undated/</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Schneier on Security</title>
  <entry>
    <title type="html">Phishing kit targets SSO portals</title>
    <link rel="replies" href="https://www.schneier.com/blog/archives/2025/07/phishing.html#comments"/>
    <id>tag:schneier.com,2025:1</id>
    <link rel="alternate" href="https://www.schneier.com/blog/archives/2025/07/phishing.html"/>
    <updated>2025-07-20T10:00:00Z</updated>
    <published>2025-07-19T09:00:00Z</published>
    <summary type="html">&lt;p&gt;A new kit.&lt;/p&gt;</summary>
    <content type="html">&lt;p&gt;Longer content.&lt;/p&gt;</content>
  </entry>
  <entry>
    <title>Only updated</title>
    <link href="https://www.schneier.com/blog/archives/2025/07/updated.html"/>
    <updated>2025-07-18T09:00:00Z</updated>
  </entry>
</feed>"#;

    const RDF: &str = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://example.org/"><title>Example</title></channel>
  <item rdf:about="https://example.org/a">
    <title>RDF advisory</title>
    <link>https://example.org/a</link>
    <description>Patch released.</description>
    <dc:date>2025-07-20T06:00:00+08:00</dc:date>
  </item>
</rdf:RDF>"#;

    #[test]
    fn test_parse_rss() {
        let items = parse_feed(RSS).unwrap();
        assert_eq!(items.len(), 3);
        let first = &items[0];
        assert_eq!(first.title, "Ransomware gang hits airline systems");
        assert_eq!(first.summary, "An extortion crew claims the breach.");
        assert_eq!(first.body.as_deref(), Some("<p>Full story body.</p>"));
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2025, 7, 19, 14, 30, 0).unwrap())
        );
        assert_eq!(
            items[1].published,
            Some(Utc.with_ymd_and_hms(2025, 7, 18, 8, 0, 0).unwrap())
        );
        assert_eq!(items[2].published, None);
    }

    #[test]
    fn test_parse_atom() {
        let items = parse_feed(ATOM).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Phishing kit targets SSO portals");
        assert_eq!(
            items[0].link,
            "https://www.schneier.com/blog/archives/2025/07/phishing.html"
        );
        assert_eq!(items[0].summary, "A new kit.");
        assert_eq!(
            items[0].published,
            Some(Utc.with_ymd_and_hms(2025, 7, 19, 9, 0, 0).unwrap())
        );
        assert_eq!(
            items[1].published,
            Some(Utc.with_ymd_and_hms(2025, 7, 18, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_rdf() {
        let items = parse_feed(RDF).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "RDF advisory");
        assert_eq!(
            items[0].published,
            Some(Utc.with_ymd_and_hms(2025, 7, 19, 22, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_rdf_items_survive_the_window() {
        let src = source("Example", 1.0);
        let items = parse_feed(RDF).unwrap();
        let kept: Vec<RawEntry> = FeedIngestor::new(3).window(items, &src, base_time()).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].link, "https://example.org/a");
    }

    #[test]
    fn test_html_entities_do_not_sink_the_feed() {
        let rss = r#"<rss version="2.0"><channel>
  <item>
    <title>Caf&eacute; chain breach&trade; &bull; update</title>
    <link>https://example.org/cafe</link>
    <description>Tom &amp; Jerry &AMP; &zzcustom; &#233;</description>
    <pubDate>Sat, 19 Jul 2025 14:30:00 +0000</pubDate>
  </item>
  <item>
    <title>Second item</title>
    <link>https://example.org/second</link>
    <pubDate>Sat, 19 Jul 2025 15:30:00 +0000</pubDate>
  </item>
</channel></rss>"#;
        let items = parse_feed(rss).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Café chain breach™ • update");
        assert!(items[0].summary.contains("Tom & Jerry &"));
        assert!(items[0].summary.contains("&zzcustom;"));
        assert!(items[0].summary.contains('é'));
        assert_eq!(items[1].title, "Second item");
    }

    #[test]
    fn test_malformed_and_unknown_feeds() {
        assert!(parse_feed("<rss><channel><item></rss>").is_err());
        assert!(matches!(
            parse_feed("<html><body>not a feed</body></html>"),
            Err(FeedError::UnknownFormat(root)) if root == "html"
        ));
        assert!(matches!(parse_feed(""), Err(FeedError::Empty)));
    }

    #[test]
    fn test_parse_feed_date_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 7, 20, 8, 0, 0).unwrap();
        assert_eq!(parse_feed_date("Sun, 20 Jul 2025 08:00:00 GMT"), Some(expected));
        assert_eq!(parse_feed_date("2025-07-20T16:00:00+08:00"), Some(expected));
        assert_eq!(parse_feed_date(" 2025-07-20 08:00:00 "), Some(expected));
        assert_eq!(parse_feed_date("yesterday"), None);
    }

    #[test]
    fn test_window_uses_calendar_days() {
        let src = source("Krebs", 1.2);
        let ingestor = FeedIngestor::new(3);
        let now = base_time();
        let at = |y, m, d, h| Some(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap());
        let item = |title: &str, published| FeedItem {
            title: title.to_string(),
            link: format!("https://x.example/{title}"),
            published,
            ..FeedItem::default()
        };
        let items = vec![
            item("three-days", at(2025, 7, 17, 0)),
            item("four-days", at(2025, 7, 16, 23)),
            item("future", at(2025, 7, 22, 0)),
            item("undated", None),
            FeedItem {
                link: String::new(),
                ..item("no-link", at(2025, 7, 20, 0))
            },
        ];
        let titles: Vec<String> = ingestor
            .window(items, &src, now)
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["three-days", "future"]);
    }

    #[tokio::test]
    async fn test_unreachable_source_yields_nothing() {
        let mut src = (*source("Down", 1.0)).clone();
        src.feed_url = "http://127.0.0.1:9/feed".to_string();
        let src = Arc::new(src);
        let mut fetcher = Fetcher::new(Duration::from_secs(2), PolitenessDelay::disabled()).unwrap();
        let entries = FeedIngestor::new(3)
            .ingest(&mut fetcher, &src, base_time())
            .await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_yields_nothing() {
        let base = crate::scrapers::http::testing::serve_status("404 Not Found", RSS).await;
        let mut src = (*source("Moved", 1.0)).clone();
        src.feed_url = format!("{base}/feed");
        let src = Arc::new(src);
        let mut fetcher = Fetcher::new(Duration::from_secs(2), PolitenessDelay::disabled()).unwrap();
        let entries = FeedIngestor::new(3)
            .ingest(&mut fetcher, &src, base_time())
            .await;
        assert!(entries.is_empty());
    }
}
