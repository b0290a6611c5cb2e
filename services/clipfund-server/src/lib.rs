//! Clipfund HTTP service
//!
//! ```text
//! /api/
//! ├── /cron       - metrics-tick, pre-lock, distribute (Bearer cron secret)
//! ├── /webhooks   - provider deliveries (HMAC signature, optional IP allowlist)
//! └── /admin      - manual finish, recompute, audit log (X-Admin-Token)
//! /health, /ready
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tokio_util::task::TaskTracker;

pub use config::{validate_config, ServerConfig};
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use state::AppState;

/// Build the full router with middleware
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let mut router = Router::new()
        .nest("/api/cron", routes::cron_routes())
        .nest("/api/webhooks", routes::webhook_routes())
        .nest("/api/admin", routes::admin_routes())
        .route("/health", axum::routing::get(handlers::health::health_check))
        .route("/ready", axum::routing::get(handlers::health::readiness_check))
        .with_state(state);

    router = router.layer(
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");

            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        }),
    );

    // request id is set outside the trace layer so the span can see it
    let x_request_id = HeaderName::from_static("x-request-id");
    router = router
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    if !cors_origins.is_empty() {
        let cors = if cors_origins.iter().any(|o| o == "*") {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(
                    cors_origins
                        .iter()
                        .filter_map(|o| o.parse().ok())
                        .collect::<Vec<_>>(),
                )
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(Any)
        };
        router = router.layer(cors);
    }

    router
}

/// Close the tracker and wait up to `grace` for background work still in
/// flight. Returns false if some of it had to be abandoned.
pub async fn drain_background(tasks: &TaskTracker, grace: Duration) -> bool {
    tasks.close();
    if tasks.is_empty() {
        return true;
    }
    tracing::info!(pending = tasks.len(), grace_secs = grace.as_secs(), "Draining background work");
    match tokio::time::timeout(grace, tasks.wait()).await {
        Ok(()) => true,
        Err(_) => {
            tracing::error!(pending = tasks.len(), "Background work abandoned at shutdown");
            false
        }
    }
}
