//! Route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

/// Cron triggers
pub fn cron_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/metrics-tick", post(handlers::cron::metrics_tick))
        .route("/pre-lock", post(handlers::cron::pre_lock))
        .route("/distribute", post(handlers::cron::distribute))
}

/// Inbound provider deliveries
pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/provider", post(handlers::webhook::receive))
}

/// Operator endpoints
pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/campaigns/:id/finish", post(handlers::admin::finish_campaign))
        .route("/campaigns/:id/recompute", post(handlers::admin::recompute_campaign))
        .route("/campaigns/:id/logs", get(handlers::admin::campaign_logs))
}
