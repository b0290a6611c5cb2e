//! Provider webhook receiver
//!
//! Verifies source and signature over the raw body, acknowledges with 200 and
//! applies the delivery on a task tracked by [`AppState::background`], which
//! shutdown drains before the process exits. Nothing is parsed or stored for
//! a delivery that fails verification.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use clipfund_ingest::{WebhookEnvelope, SIGNATURE_HEADER};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub id: String,
}

/// POST /api/webhooks/provider
pub async fn receive(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let forwarded_for = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    if let Err(e) = state.verifier.verify(peer.ip(), forwarded_for, signature, &body) {
        warn!(peer = %peer, error = %e, "Webhook rejected");
        metrics::counter!("clipfund_webhooks_rejected_total").increment(1);
        return Err(ApiError::from(e));
    }

    let envelope = WebhookEnvelope::from_slice(&body)?;
    let ack = WebhookAck {
        received: true,
        id: envelope.id.clone(),
    };

    let engine = state.engine.clone();
    state.background.spawn(async move {
        match engine.webhooks().process(&envelope).await {
            Ok(report) => debug!(event_id = %envelope.id, ?report, "Webhook processed"),
            Err(e) => error!(event_id = %envelope.id, error = %e, "Webhook processing failed"),
        }
    });

    Ok(Json(ack))
}
