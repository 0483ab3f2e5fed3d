//! HTTP fetching shared by every source adapter.
//!
//! One client, one user agent, and a fixed politeness delay that adapters
//! await between outbound requests. There is deliberately no retry: a failed
//! request surfaces as a `FetchError` and the caller decides what to keep.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::FetchSettings;

/// Errors that can occur during fetching.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Rate limited by {host}, retry after {retry_after_secs}s")]
    RateLimited { host: String, retry_after_secs: u64 },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// Whether the server answered 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::HttpStatus { status: 404, .. })
    }
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Request timeout
    pub timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Delay between requests
    pub request_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig::from(&FetchSettings::default())
    }
}

impl From<&FetchSettings> for FetcherConfig {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_seconds),
            user_agent: settings.user_agent.clone(),
            request_delay: Duration::from_millis(settings.request_delay_ms),
        }
    }
}

/// HTTP fetcher.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    config: FetcherConfig,
}

impl Fetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("aoe-group-tracker/0.1.0")),
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    /// The configured politeness delay.
    pub fn request_delay(&self) -> Duration {
        self.config.request_delay
    }

    /// Sleep for the politeness delay.
    pub async fn pause(&self) {
        if !self.config.request_delay.is_zero() {
            tokio::time::sleep(self.config.request_delay).await;
        }
    }

    /// GET a URL and return the body as text.
    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        info!("Fetching {}", url);
        let response = self.client.get(url.as_str()).send().await?;
        let response = Self::check_status(url, response)?;
        Ok(response.text().await?)
    }

    /// POST form-encoded fields and decode the JSON response.
    pub async fn post_form_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        form: &[(&str, String)],
    ) -> Result<T, FetchError> {
        debug!("POST {} ({} fields)", url, form.len());
        let response = self.client.post(url.as_str()).form(form).send().await?;
        let response = Self::check_status(url, response)?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Map non-success statuses to errors.
    fn check_status(
        url: &Url,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(FetchError::RateLimited {
                host: url.host_str().unwrap_or("unknown").to_string(),
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        Ok(response)
    }
}

/// Join a path onto a base URL, keeping any path prefix the base carries.
pub fn join_url(base: &str, path: &str) -> Result<Url, FetchError> {
    let base = format!("{}/", base.trim_end_matches('/'));
    let base = Url::parse(&base).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", base, e)))?;
    base.join(path.trim_start_matches('/'))
        .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();

        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.request_delay, Duration::from_millis(1000));
        assert!(config.user_agent.contains("Mozilla"));
    }

    #[test]
    fn test_fetcher_config_from_settings() {
        let settings = FetchSettings {
            timeout_seconds: 3,
            request_delay_ms: 0,
            user_agent: "test-agent".to_string(),
        };
        let config = FetcherConfig::from(&settings);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(config.request_delay.is_zero());
    }

    #[test]
    fn test_join_url_keeps_prefix() {
        let url = join_url("http://127.0.0.1:9000/api", "/community/leaderboard/x").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/api/community/leaderboard/x");

        let url = join_url("https://example.com/", "user/5/matches/?page=2").unwrap();
        assert_eq!(url.as_str(), "https://example.com/user/5/matches/?page=2");
    }

    #[test]
    fn test_join_url_invalid_base() {
        assert!(matches!(
            join_url("nope", "x"),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_not_found_detection() {
        let err = FetchError::HttpStatus {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pause_with_zero_delay_returns() {
        let fetcher = Fetcher::new(FetcherConfig {
            request_delay: Duration::ZERO,
            ..Default::default()
        })
        .unwrap();
        fetcher.pause().await;
        assert!(fetcher.request_delay().is_zero());
    }
}
