//! Clipfund Ingest - engagement metrics from the external provider
//!
//! Two paths bring metrics in:
//!
//! - **Pull**: the scheduler calls [`MetricsProvider::fetch_metrics`] per
//!   content URL during a refresh cycle.
//! - **Push**: the provider POSTs webhooks; [`webhook`] verifies and parses
//!   them, and the engine bulk-fetches the referenced ids.
//!
//! Whatever the provider returns is normalized into a [`MetricsSnapshot`] at
//! this boundary.

pub mod cache;
pub mod error;
pub mod http;
pub mod provider;
pub mod snapshot;
pub mod webhook;

pub use cache::TtlCell;
pub use error::{IngestError, IngestResult, WebhookError};
pub use http::{HttpMetricsProvider, ProviderConfig};
pub use provider::{MetricsProvider, RefreshTicket};
pub use snapshot::{BulkMetrics, MetricsSnapshot, UnavailableContent, SNAPSHOT_SCHEMA_VERSION};
pub use webhook::{
    client_ip, sign, verify_signature, IpAllowlist, WebhookEnvelope, WebhookEvent, WebhookItem,
    WebhookVerifier, SIGNATURE_HEADER,
};
