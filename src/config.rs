//! Run configuration: the source registry plus model and pipeline settings.
//!
//! The whole file is read once at start-up into an [`AppConfig`] which is
//! then passed by reference to every stage. A source record missing any
//! required field is rejected here, before anything is fetched.
//!
//! ```yaml
//! sources:
//!   - name: Krebs on Security
//!     feed_url: https://krebsonsecurity.com/feed/
//!     enabled: true
//!     weight: 1.2
//!     language: en
//!     region: US
//!     category: Research
//! llm:
//!   model: glm-4-flash
//! pipeline:
//!   window_days: 3
//! ```

use crate::models::Source;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument};

pub const MIN_WEIGHT: f64 = 0.5;
pub const MAX_WEIGHT: f64 = 1.5;

/// Sources at or above this weight count as high priority in the registry
/// statistics.
pub const HIGH_PRIORITY_WEIGHT: f64 = 1.1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config file is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("source #{index} ({name}) is missing required field `{field}`")]
    MissingField {
        index: usize,
        name: String,
        field: &'static str,
    },
    #[error("source `{name}` has weight {weight}, expected 0.5..=1.5")]
    WeightOutOfRange { name: String, weight: f64 },
    #[error("source #{index} has an empty `{field}`")]
    EmptyField { index: usize, field: &'static str },
    #[error("source `{0}` is registered twice")]
    DuplicateSource(String),
    #[error("no sources are registered")]
    NoSources,
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// A source record exactly as written in the file; every field optional so
/// that absence can be reported by name.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SourceRecord {
    pub name: Option<String>,
    #[serde(alias = "rss_url")]
    pub feed_url: Option<String>,
    pub enabled: Option<bool>,
    pub weight: Option<f64>,
    pub language: Option<String>,
    pub region: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// Settings for the chat-completions endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    /// No key means the model is never called and every stage takes its
    /// deterministic path.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: usize,
    /// Ask the model for an overall situation summary of the selection.
    pub situation_summary: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string(),
            model: "glm-4-flash".to_string(),
            api_key: None,
            timeout_secs: 60,
            max_retries: 2,
            situation_summary: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Feed items older than this many calendar days are dropped.
    pub window_days: i64,
    pub top_n: usize,
    /// Article bodies are cut to this many characters.
    pub max_content_length: usize,
    pub request_timeout_secs: u64,
    /// Bounds of the randomized pause between two requests to one host.
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Use an article body shipped inside the feed instead of fetching the page.
    pub prefer_feed_body: bool,
    /// Extra relevance keywords on top of the built-in list.
    pub extra_keywords: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_days: 3,
            top_n: crate::pipeline::select::DEFAULT_TOP_N,
            max_content_length: 3000,
            request_timeout_secs: 15,
            min_delay_ms: 1000,
            max_delay_ms: 3000,
            prefer_feed_body: true,
            extra_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    sources: Vec<SourceRecord>,
    #[serde(default)]
    llm: LlmSettings,
    #[serde(default)]
    pipeline: PipelineSettings,
}

/// Validated configuration for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sources: Vec<Arc<Source>>,
    pub llm: LlmSettings,
    pub pipeline: PipelineSettings,
}

/// Counts over the registry, logged at start-up.
#[derive(Debug, Default, PartialEq)]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub high_priority: usize,
    pub by_region: BTreeMap<String, usize>,
    pub by_language: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

impl AppConfig {
    #[instrument(level = "info")]
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_string(),
                source,
            })?;
        let config = Self::from_yaml_str(&text)?;
        info!(
            sources = config.sources.len(),
            enabled = config.enabled_sources().count(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        if raw.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(raw.sources.len());
        for (index, record) in raw.sources.into_iter().enumerate() {
            let source = validate_source(index, record)?;
            if !seen.insert(source.name.clone()) {
                return Err(ConfigError::DuplicateSource(source.name));
            }
            sources.push(Arc::new(source));
        }

        let pipeline = raw.pipeline;
        if pipeline.top_n == 0 {
            return Err(ConfigError::InvalidSetting("pipeline.top_n must be > 0".into()));
        }
        if pipeline.window_days < 0 {
            return Err(ConfigError::InvalidSetting(
                "pipeline.window_days must be >= 0".into(),
            ));
        }
        if pipeline.min_delay_ms > pipeline.max_delay_ms {
            return Err(ConfigError::InvalidSetting(
                "pipeline.min_delay_ms must not exceed pipeline.max_delay_ms".into(),
            ));
        }

        Ok(Self {
            sources,
            llm: raw.llm,
            pipeline,
        })
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &Arc<Source>> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn registry_stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total: self.sources.len(),
            ..Default::default()
        };
        for source in self.enabled_sources() {
            stats.enabled += 1;
            if source.weight >= HIGH_PRIORITY_WEIGHT {
                stats.high_priority += 1;
            }
            *stats.by_region.entry(source.region.clone()).or_default() += 1;
            *stats.by_language.entry(source.language.clone()).or_default() += 1;
            *stats.by_category.entry(source.category.clone()).or_default() += 1;
        }
        stats
    }
}

/// Turn a file record into a [`Source`], naming the first missing field.
pub fn validate_source(index: usize, record: SourceRecord) -> Result<Source, ConfigError> {
    let label = record
        .name
        .clone()
        .unwrap_or_else(|| "unnamed".to_string());
    let missing = |field: &'static str| ConfigError::MissingField {
        index,
        name: label.clone(),
        field,
    };

    let name = record.name.ok_or_else(|| missing("name"))?;
    let feed_url = record.feed_url.ok_or_else(|| missing("feed_url"))?;
    let weight = record.weight.ok_or_else(|| missing("weight"))?;
    let language = record.language.ok_or_else(|| missing("language"))?;
    let region = record.region.ok_or_else(|| missing("region"))?;
    let category = record.category.ok_or_else(|| missing("category"))?;
    let enabled = record.enabled.ok_or_else(|| missing("enabled"))?;

    if name.trim().is_empty() {
        return Err(ConfigError::EmptyField {
            index,
            field: "name",
        });
    }
    if feed_url.trim().is_empty() {
        return Err(ConfigError::EmptyField {
            index,
            field: "feed_url",
        });
    }
    if !(MIN_WEIGHT..=MAX_WEIGHT).contains(&weight) {
        return Err(ConfigError::WeightOutOfRange { name, weight });
    }

    Ok(Source {
        name,
        feed_url,
        enabled,
        weight,
        language,
        region,
        category,
        description: record.description,
    })
}
