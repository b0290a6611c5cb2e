//! HTTP metrics provider

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::cache::TtlCell;
use crate::{BulkMetrics, IngestError, IngestResult, MetricsProvider, MetricsSnapshot, RefreshTicket};

/// Provider client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_token: String,
    /// Platform slug resolved to the provider's internal id
    pub platform: String,
    pub request_timeout_secs: u64,
    pub platform_id_ttl_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9400".to_string(),
            api_token: String::new(),
            platform: "tiktok".to_string(),
            request_timeout_secs: 20,
            platform_id_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlatformLookup {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    job_id: Option<String>,
}

/// [`MetricsProvider`] over the provider's REST API
pub struct HttpMetricsProvider {
    client: Client,
    config: ProviderConfig,
    platform_id: TtlCell<String>,
}

impl HttpMetricsProvider {
    pub fn new(config: ProviderConfig) -> IngestResult<Self> {
        if config.base_url.is_empty() {
            return Err(IngestError::Config("provider base_url is empty".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| IngestError::Config(e.to_string()))?;

        Ok(Self {
            client,
            platform_id: TtlCell::new(Duration::from_secs(config.platform_id_ttl_secs)),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn platform_id(&self) -> IngestResult<String> {
        self.platform_id
            .get_or_try_init(move || async move {
                let url = self.url(&format!("/v1/platforms/{}", self.config.platform));
                debug!(platform = %self.config.platform, "Resolving provider platform id");
                let response = self
                    .client
                    .get(url)
                    .bearer_auth(&self.config.api_token)
                    .send()
                    .await?;
                let lookup: PlatformLookup = check(response).await?.json().await?;
                Ok::<_, IngestError>(lookup.id)
            })
            .await
    }

    /// Send an authenticated call scoped to the cached platform id
    async fn send(&self, request: RequestBuilder) -> IngestResult<Response> {
        let response = request.bearer_auth(&self.config.api_token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // platform ids can be rotated; force a fresh lookup next time
            self.platform_id.invalidate().await;
        }
        check(response).await
    }
}

/// Map a non-success status to an [`IngestError`]
async fn check(response: Response) -> IngestResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, retry_after, body))
}

fn status_error(status: StatusCode, retry_after_secs: Option<u64>, body: String) -> IngestError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            IngestError::unavailable(if body.is_empty() { status.to_string() } else { body })
        }
        StatusCode::TOO_MANY_REQUESTS => IngestError::RateLimited { retry_after_secs },
        _ => IngestError::Provider {
            status: status.as_u16(),
            message: body,
        },
    }
}

#[async_trait]
impl MetricsProvider for HttpMetricsProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_metrics(&self, content_url: &str) -> IngestResult<MetricsSnapshot> {
        let platform = self.platform_id().await?;
        let request = self
            .client
            .get(self.url(&format!("/v1/platforms/{}/content", platform)))
            .query(&[("url", content_url)]);
        let body: Value = self.send(request).await?.json().await?;
        MetricsSnapshot::from_value(&body, Utc::now())
    }

    async fn fetch_metrics_bulk(&self, content_ids: &[String]) -> IngestResult<BulkMetrics> {
        if content_ids.is_empty() {
            return Ok(BulkMetrics::default());
        }
        let platform = self.platform_id().await?;
        let request = self
            .client
            .post(self.url(&format!("/v1/platforms/{}/content/bulk", platform)))
            .json(&json!({ "ids": content_ids }));
        let body: BulkResponse = self.send(request).await?.json().await?;
        Ok(BulkMetrics::from_items(&body.items, Utc::now()))
    }

    async fn request_refresh(&self, account_id: &str) -> IngestResult<RefreshTicket> {
        let platform = self.platform_id().await?;
        let request = self
            .client
            .post(self.url(&format!("/v1/platforms/{}/refresh", platform)))
            .json(&json!({ "accountId": account_id }));
        let body: RefreshResponse = self.send(request).await?.json().await?;
        Ok(RefreshTicket {
            job_id: body.job_id,
        })
    }
}
