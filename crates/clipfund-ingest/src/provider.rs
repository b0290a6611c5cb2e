//! The metrics provider contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{BulkMetrics, IngestResult, MetricsSnapshot};

/// Acknowledgement of a fire-and-forget refresh request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTicket {
    /// Provider job id; completion arrives later as a `refresh.completed` webhook
    pub job_id: Option<String>,
}

/// External engagement source.
///
/// Implementations own their timeouts: callers never cancel an in-flight
/// request, so every method must return within a bounded time.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Pull the current counters for one public content URL
    async fn fetch_metrics(&self, content_url: &str) -> IngestResult<MetricsSnapshot>;

    /// Pull counters for many content ids at once.
    ///
    /// Ids the provider does not know are simply absent from the result.
    /// Content it reports as private or removed comes back in
    /// [`BulkMetrics::unavailable`].
    async fn fetch_metrics_bulk(&self, content_ids: &[String]) -> IngestResult<BulkMetrics>;

    /// Ask the provider to re-scrape everything posted from `account_id`
    async fn request_refresh(&self, account_id: &str) -> IngestResult<RefreshTicket>;
}
