use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::error::{ConfigError, FetchError};

const ENGINE: &str = "google_jobs";

/// One page request against the search API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub title: String,
    /// Folded into the free-text query.
    pub location: Option<String>,
    /// Sent as the API's `location` parameter.
    pub geotarget: Option<String>,
    pub page_token: Option<String>,
}

impl FetchRequest {
    pub fn query_text(&self) -> String {
        match self.location.as_deref() {
            Some(location) if !location.trim().is_empty() => format!("{} {}", self.title, location),
            _ => self.title.clone(),
        }
    }
}

// --- Fetcher trait ---

#[async_trait]
pub trait JobFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Wait before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// --- SearchAPI client ---

pub struct SearchApiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    gl: String,
    hl: String,
    retry: RetryPolicy,
}

impl SearchApiClient {
    pub fn new(config: &Config, retry: RetryPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            gl: config.gl.clone(),
            hl: config.hl.clone(),
            retry,
        })
    }

    fn query_params(&self, api_key: &str, request: &FetchRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("engine", ENGINE.to_string()),
            ("q", request.query_text()),
            ("api_key", api_key.to_string()),
            ("gl", self.gl.clone()),
            ("hl", self.hl.clone()),
        ];
        if let Some(geotarget) = &request.geotarget {
            params.push(("location", geotarget.clone()));
        }
        if let Some(token) = &request.page_token {
            params.push(("next_page_token", token.clone()));
        }
        params
    }

    async fn fetch_once(&self, params: &[(&'static str, String)]) -> Result<Value, FetchError> {
        let response = self.client.get(&self.api_url).query(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        if body.is_null() {
            return Err(FetchError::Empty);
        }
        Ok(body)
    }
}

#[async_trait]
impl JobFetcher for SearchApiClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingVar("SEARCH_API_KEY"))?;
        let params = self.query_params(api_key, request);
        let query = request.query_text();
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            tracing::debug!(%query, attempt, continuation = request.page_token.is_some(), "Fetching jobs");
            match self.fetch_once(&params).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        %query,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(%query, attempt, error = %e, "Fetch failed");
                    return Err(e);
                }
            }
        }
    }
}
