//! Configuration loading
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - an optional TOML file (`[model]`, `[budget]`, `[output]`, `[logging]`)
//! - `ENGINE__<SECTION>__<KEY>` environment variables, after `.env` is loaded
//!
//! The API key falls back to `ANTHROPIC_API_KEY` when no source sets it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::budget::{BudgetConfig, BudgetError};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error(transparent)]
    Budget(#[from] BudgetError),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("ENGINE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;

        if config.model.api_key.is_none() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                config.model.api_key = Some(SecretString::new(key));
            }
        }

        config.budget.validate()?;
        Ok(config)
    }
}

/// Remote model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key (falls back to ANTHROPIC_API_KEY)
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Value of the anthropic-version header
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,

    /// Beta features sent in the anthropic-beta header
    #[serde(default = "default_betas")]
    pub betas: Vec<String>,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Longest wait for the next stream event, in seconds
    #[serde(default = "default_event_timeout")]
    pub event_timeout_secs: u64,

    /// Counter used for prompts and finished responses
    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

/// Which token counter a run uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// The model endpoint's count_tokens call
    #[default]
    Remote,
    /// Local cl100k_base approximation
    Tiktoken,
    /// Word count times 1.3, for offline use
    Words,
}

fn default_api_url() -> String { "https://api.anthropic.com".to_string() }
fn default_model() -> String { "claude-3-7-sonnet-20250219".to_string() }
fn default_anthropic_version() -> String { "2023-06-01".to_string() }
fn default_betas() -> Vec<String> { vec!["output-128k-2025-02-19".to_string()] }
fn default_connect_timeout() -> u64 { 30 }
fn default_event_timeout() -> u64 { 300 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            anthropic_version: default_anthropic_version(),
            betas: default_betas(),
            connect_timeout_secs: default_connect_timeout(),
            event_timeout_secs: default_event_timeout(),
            tokenizer: TokenizerKind::default(),
        }
    }
}

impl ModelConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(key.into()));
        self
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get stream idle timeout as Duration
    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs)
    }
}

/// Artifact output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory reports are written to when the caller gives none
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
}

fn default_output_dir() -> PathBuf { PathBuf::from(".") }

impl Default for OutputConfig {
    fn default() -> Self {
        Self { directory: default_output_dir() }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
