//! Cron triggers
//!
//! Each endpoint runs one pass synchronously and returns its report. Lease
//! contention inside a pass is a silent skip, so overlapping cron calls are
//! harmless.

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::info;

use clipfund_engine::{BatchReport, PreLockReport, TickReport};

use crate::auth::Authorized;
use crate::error::ApiResult;
use crate::state::AppState;

/// POST /api/cron/metrics-tick
pub async fn metrics_tick(
    Authorized(caller): Authorized,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TickReport>> {
    let report = state.engine.scheduler().tick().await?;
    info!(
        caller = caller.as_str(),
        campaigns = report.campaigns.len(),
        refreshed = report.refreshed(),
        "Metrics tick triggered"
    );
    Ok(Json(report))
}

/// POST /api/cron/pre-lock
pub async fn pre_lock(
    Authorized(caller): Authorized,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<PreLockReport>> {
    let report = state.engine.pre_lock().run().await?;
    info!(caller = caller.as_str(), locked = report.locked, "Pre-end lock triggered");
    Ok(Json(report))
}

/// POST /api/cron/distribute
pub async fn distribute(
    Authorized(caller): Authorized,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<BatchReport>> {
    let report = state.engine.settlement().process_ended_campaigns().await?;
    info!(
        caller = caller.as_str(),
        processed = report.processed,
        failed = report.failed,
        "Distribute triggered"
    );
    Ok(Json(report))
}
