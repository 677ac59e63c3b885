//! Chat-completion client for the language model, with retry and JSON
//! extraction.
//!
//! # Architecture
//!
//! - [`Complete`]: the single capability the pipeline needs from a model
//! - [`ChatClient`]: an OpenAI-compatible `chat/completions` client
//! - [`RetryAsk`]: decorator adding exponential backoff to any [`Complete`]
//! - [`parse_structured`]: pulls the first well-formed JSON object out of a
//!   reply and deserializes it
//!
//! Calling and parsing are separate steps. A stage falls back to its
//! deterministic path whenever either one returns `Err`.
//!
//! # Retry Strategy
//!
//! - Configurable number of retries (2 by default)
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter (0-250ms)
//! - A disabled client (no API key) is never retried

use crate::config::LlmSettings;
use crate::utils::{looks_truncated, truncate_for_log};
use rand::{Rng, rng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// The kinds of request the pipeline makes. Each has fixed sampling
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Selection,
    Categorization,
    Summary,
}

impl CallKind {
    pub fn temperature(self) -> f32 {
        match self {
            CallKind::Selection => 0.3,
            CallKind::Categorization => 0.5,
            CallKind::Summary => 0.7,
        }
    }

    pub fn max_tokens(self) -> u32 {
        match self {
            CallKind::Selection => 2000,
            CallKind::Categorization => 4000,
            CallKind::Summary => 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Selection => "selection",
            CallKind::Categorization => "categorization",
            CallKind::Summary => "summary",
        }
    }
}

/// Why a model call produced no text.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("language model is not configured")]
    Disabled,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response had no content")]
    EmptyResponse,
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Disabled => false,
            CallError::Status { status, .. } => *status == 429 || *status >= 500,
            CallError::Transport(_) | CallError::EmptyResponse => true,
        }
    }
}

/// Why a reply could not be read as the expected structure.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in model response")]
    NoJsonObject,
    #[error("JSON does not match the expected shape: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Text completion: one prompt in, one reply out.
pub trait Complete {
    async fn complete(&self, kind: CallKind, prompt: &str) -> Result<String, CallError>;
}

/// OpenAI-compatible chat completions client.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_key", &self.api_key.is_some())
            .finish()
    }
}

impl ChatClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .connect_timeout(StdDuration::from_secs(10))
            .timeout(StdDuration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Complete for ChatClient {
    #[instrument(level = "info", skip_all, fields(kind = kind.as_str()))]
    async fn complete(&self, kind: CallKind, prompt: &str) -> Result<String, CallError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(CallError::Disabled);
        };
        let t0 = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: kind.temperature(),
            max_tokens: kind.max_tokens(),
        };

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "Model endpoint returned an error"
            );
            return Err(CallError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body, 300),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CallError::EmptyResponse)?;

        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            bytes = content.len(),
            "Model call succeeded"
        );
        Ok(content)
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Complete`]
/// implementation.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: Complete,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Complete for RetryAsk<T>
where
    T: Complete,
{
    #[instrument(level = "info", skip_all, fields(kind = kind.as_str()))]
    async fn complete(&self, kind: CallKind, prompt: &str) -> Result<String, CallError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.complete(kind, prompt).await {
                Ok(resp) => return Ok(resp),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "complete() exhausted retries"
                        );
                        return Err(e);
                    }

                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "complete() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// The client the binary runs with.
pub type LlmClient = RetryAsk<ChatClient>;

pub fn build_client(settings: &LlmSettings) -> Result<LlmClient, CallError> {
    let client = ChatClient::new(settings)?;
    if client.is_enabled() {
        info!(model = %settings.model, base_url = %settings.base_url, "Language model enabled");
    } else {
        warn!("No model API key configured; using deterministic selection and categorization");
    }
    Ok(RetryAsk::new(
        client,
        settings.max_retries,
        StdDuration::from_secs(1),
    ))
}

/// Find the first balanced, well-formed JSON object in `text`.
///
/// Models wrap JSON in prose or code fences; this scans every `{` in order,
/// finds its matching `}` (ignoring braces inside strings) and returns the
/// first candidate that parses.
pub fn extract_json_object(text: &str) -> Option<&str> {
    for (start, _) in text.match_indices('{') {
        let Some(end) = matching_brace(&text[start..]) else {
            continue;
        };
        let candidate = &text[start..start + end + 1];
        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
            return Some(candidate);
        }
    }
    None
}

/// Byte offset of the `}` closing the object that opens at offset 0.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the first JSON object from a model reply and deserialize it.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let Some(json) = extract_json_object(text) else {
        // A reply cut off by the token limit never closes its object.
        if let Some(start) = text.find('{') {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&text[start..]) {
                if looks_truncated(&e) {
                    warn!(
                        response_preview = %truncate_for_log(text, 300),
                        "Model reply looks truncated"
                    );
                }
            }
        }
        return Err(ParseError::NoJsonObject);
    };
    Ok(serde_json::from_str(json)?)
}
