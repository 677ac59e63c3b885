//! Command-line interface definitions for secbrief.
//!
//! Flags override the matching settings from the configuration file. The
//! model endpoint settings can also come from environment variables.

use crate::config::AppConfig;
use clap::Parser;

/// Command-line arguments for the secbrief daily run.
///
/// # Examples
///
/// ```sh
/// # Default registry, reports written to ./reports
/// secbrief
///
/// # Custom registry and output directory, model key from the environment
/// LLM_API_KEY=... secbrief -c ./config/sources.yaml -o /srv/briefs
///
/// # Validate the registry and print its statistics without fetching anything
/// secbrief --check-config
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML source registry and settings
    #[arg(short, long, env = "SECBRIEF_CONFIG", default_value = "config/sources.yaml")]
    pub config: String,

    /// Output directory for the daily JSON report
    #[arg(short, long, default_value = "reports")]
    pub output_dir: String,

    /// API key for the chat-completions endpoint
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Chat-completions endpoint URL
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Model name sent with every request
    #[arg(long, env = "LLM_MODEL")]
    pub llm_model: Option<String>,

    /// Number of stories to keep
    #[arg(short = 'n', long)]
    pub top_n: Option<usize>,

    /// Recency window in calendar days
    #[arg(short, long)]
    pub window_days: Option<i64>,

    /// Never call the model; use the keyword and weight fallbacks only
    #[arg(long)]
    pub no_llm: bool,

    /// Validate the configuration, print registry statistics and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Apply flag and environment overrides on top of the loaded file.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(key) = &self.llm_api_key {
            config.llm.api_key = Some(key.clone());
        }
        if let Some(url) = &self.llm_base_url {
            config.llm.base_url = url.clone();
        }
        if let Some(model) = &self.llm_model {
            config.llm.model = model.clone();
        }
        if let Some(top_n) = self.top_n.filter(|n| *n > 0) {
            config.pipeline.top_n = top_n;
        }
        if let Some(days) = self.window_days.filter(|d| *d >= 0) {
            config.pipeline.window_days = days;
        }
        if self.no_llm {
            config.llm.api_key = None;
        }
    }
}
