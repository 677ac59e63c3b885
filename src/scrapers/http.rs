//! Shared HTTP transport for feeds and article pages.
//!
//! Every request goes through one [`Fetcher`], which remembers when each host
//! was last contacted and sleeps before hitting the same host again.

use rand::{Rng, rng};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, instrument};
use url::Url;

/// Desktop browser identity; several security outlets refuse bare clients.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("URL has no host: {0}")]
    NoHost(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

/// Per-host pause between consecutive requests.
///
/// The pause for each request is drawn uniformly from `[min, max]`.
#[derive(Debug)]
pub struct PolitenessDelay {
    min: Duration,
    max: Duration,
    last_hit: HashMap<String, Instant>,
}

impl PolitenessDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max,
            last_hit: HashMap::new(),
        }
    }

    /// No pause at all; used by tests.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn pick_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rng().random_range(min_ms..=max_ms))
    }

    /// How long a request to `host` made now would have to wait.
    pub fn remaining(&self, host: &str, delay: Duration) -> Duration {
        match self.last_hit.get(host) {
            Some(last) => delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until `host` may be contacted again, then record the contact.
    pub async fn wait_for(&mut self, host: &str) {
        let wait = self.remaining(host, self.pick_delay());
        if !wait.is_zero() {
            debug!(host, wait_ms = wait.as_millis() as u64, "Politeness delay");
            sleep(wait).await;
        }
        self.last_hit.insert(host.to_string(), Instant::now());
    }
}

/// HTTP client with a bounded timeout and the politeness delay.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    politeness: PolitenessDelay,
}

impl Fetcher {
    pub fn new(timeout: Duration, politeness: PolitenessDelay) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(DESKTOP_USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;
        Ok(Self { client, politeness })
    }

    /// GET `url` and return the body; any non-2xx status is an error.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_text(&mut self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::NoHost(url.to_string()))?
            .to_lowercase();
        self.politeness.wait_for(&host).await;

        let response = self
            .client
            .get(parsed)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}
