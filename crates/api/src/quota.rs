//! Subscription quota client.
//!
//! Asks the subscription service whether a website may ingest more events.
//! Definite answers are cached; transport and protocol failures come back
//! as `Unknown` and are resolved by the configured policy.

use std::time::Duration;

use async_trait::async_trait;
use engine_core::{
    is_safe_identifier, Error, QuotaChecker, QuotaDecision, Result, UnknownQuotaPolicy,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use telemetry::health;
use tracing::{debug, warn};
use url::Url;

/// Quota service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Base URL; empty or `mock` allows everything without network calls
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Policy for `Unknown` decisions
    #[serde(default)]
    pub on_unknown: UnknownQuotaPolicy,
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            timeout_ms: default_timeout_ms(),
            on_unknown: UnknownQuotaPolicy::default(),
        }
    }
}

/// Body returned by `GET {url}/internal/quota/{website_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaResponse {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl From<QuotaResponse> for QuotaDecision {
    fn from(response: QuotaResponse) -> Self {
        if response.allowed {
            QuotaDecision::Allowed
        } else {
            QuotaDecision::Denied {
                reason: response
                    .reason
                    .unwrap_or_else(|| "event quota exceeded".to_string()),
            }
        }
    }
}

/// HTTP client for the subscription service.
#[derive(Clone)]
pub struct QuotaClient {
    /// `None` in mock mode
    base_url: Option<Url>,
    http_client: reqwest::Client,
    /// website id -> definite decision
    cache: Cache<String, QuotaDecision>,
}

impl QuotaClient {
    pub fn new(config: &QuotaConfig) -> Result<Self> {
        let raw = config.url.trim();
        let base_url = if raw.is_empty() || raw == "mock" {
            None
        } else {
            let url = Url::parse(raw)
                .map_err(|e| Error::config(format!("quota url '{}': {}", raw, e)))?;
            if url.cannot_be_a_base() {
                return Err(Error::config(format!("quota url '{}' cannot be a base", raw)));
            }
            Some(url)
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::internal(format!("quota HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            http_client,
            cache: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(Duration::from_secs(config.cache_ttl_secs))
                .build(),
        })
    }

    pub fn is_mock(&self) -> bool {
        self.base_url.is_none()
    }

    /// `{base}/internal/quota/{website_id}`, with the id as one path segment.
    ///
    /// `None` for ids outside the safe character set.
    pub fn quota_url(&self, website_id: &str) -> Option<Url> {
        if website_id.is_empty() || !is_safe_identifier(website_id) {
            return None;
        }
        let mut url = self.base_url.clone()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["internal", "quota", website_id]);
        Some(url)
    }

    async fn remote_check(&self, url: Url, website_id: &str) -> QuotaDecision {
        debug!(url = %url, "Calling quota service");

        let response = match self.http_client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(website_id = website_id, error = %e, "Quota service request failed");
                health().quota.mark_down(e.to_string());
                return QuotaDecision::Unknown;
            }
        };

        if !response.status().is_success() {
            warn!(
                website_id = website_id,
                status = %response.status(),
                "Quota service returned error"
            );
            return QuotaDecision::Unknown;
        }

        match response.json::<QuotaResponse>().await {
            Ok(body) => {
                health().quota.mark_up();
                body.into()
            }
            Err(e) => {
                warn!(website_id = website_id, error = %e, "Failed to parse quota response");
                QuotaDecision::Unknown
            }
        }
    }

    /// Forgets the cached decision of a website.
    pub async fn invalidate(&self, website_id: &str) {
        self.cache.invalidate(website_id).await;
    }
}

#[async_trait]
impl QuotaChecker for QuotaClient {
    async fn check(&self, website_id: &str) -> QuotaDecision {
        if self.is_mock() {
            return QuotaDecision::Allowed;
        }

        let Some(url) = self.quota_url(website_id) else {
            warn!(website_id = website_id, "Refusing quota check for unsafe website id");
            return QuotaDecision::Denied {
                reason: "invalid website id".to_string(),
            };
        };

        if let Some(cached) = self.cache.get(website_id).await {
            return cached;
        }

        let decision = self.remote_check(url, website_id).await;
        if decision != QuotaDecision::Unknown {
            self.cache
                .insert(website_id.to_string(), decision.clone())
                .await;
        }
        decision
    }
}
