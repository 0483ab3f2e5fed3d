//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Outbound HTTP behaviour shared by every source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Fixed politeness delay between outbound requests
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    10
}

fn default_request_delay() -> u64 {
    1000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string()
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            request_delay_ms: default_request_delay(),
            user_agent: default_user_agent(),
        }
    }
}

/// Structured JSON source (WorldsEdge community API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldsEdgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_worldsedge_url")]
    pub base_url: String,

    /// Game title parameter sent with every query
    #[serde(default = "default_title")]
    pub title: String,

    /// Look up display names for every profile seen in a run
    #[serde(default = "default_true")]
    pub resolve_aliases: bool,
}

fn default_true() -> bool {
    true
}

fn default_worldsedge_url() -> String {
    "https://aoe-api.worldsedgelink.com".to_string()
}

fn default_title() -> String {
    "age2".to_string()
}

impl Default for WorldsEdgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_worldsedge_url(),
            title: default_title(),
            resolve_aliases: true,
        }
    }
}

/// Scraped HTML source (aoe2insights match list pages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_insights_url")]
    pub base_url: String,

    /// Hard cap on list pages fetched per player
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_insights_url() -> String {
    "https://www.aoe2insights.com".to_string()
}

fn default_max_pages() -> u32 {
    100
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_insights_url(),
            max_pages: default_max_pages(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub worldsedge: WorldsEdgeConfig,

    #[serde(default)]
    pub insights: InsightsConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/tracker.sqlite")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            fetch: FetchSettings::default(),
            worldsedge: WorldsEdgeConfig::default(),
            insights: InsightsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "fetch timeout must be greater than 0".to_string(),
            ));
        }

        if self.insights.max_pages == 0 {
            return Err(ConfigError::ValidationError(
                "insights max_pages must be greater than 0".to_string(),
            ));
        }

        for (name, base) in [
            ("worldsedge", &self.worldsedge.base_url),
            ("insights", &self.insights.base_url),
        ] {
            if base.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} base_url must not be empty",
                    name
                )));
            }
            Url::parse(base).map_err(|e| {
                ConfigError::ValidationError(format!("{} base_url is invalid: {}", name, e))
            })?;
        }

        if self.worldsedge.title.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "worldsedge title must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
