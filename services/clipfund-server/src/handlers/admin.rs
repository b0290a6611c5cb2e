//! Operator endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use clipfund_engine::{RecomputeReport, SettlementReport};
use clipfund_types::{CampaignId, MetricFetchLog};

use crate::auth::Authorized;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LOG_LIMIT: u32 = 100;
const MAX_LOG_LIMIT: u32 = 1_000;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<u32>,
}

fn campaign_id(raw: &str) -> ApiResult<CampaignId> {
    CampaignId::parse(raw).map_err(|_| ApiError::BadRequest(format!("invalid campaign id: {}", raw)))
}

/// POST /api/admin/campaigns/:id/finish
pub async fn finish_campaign(
    Authorized(caller): Authorized,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SettlementReport>> {
    let id = campaign_id(&id)?;
    info!(caller = caller.as_str(), campaign_id = %id, "Manual settlement requested");
    let report = state.engine.settlement().finish(id).await?;
    Ok(Json(report))
}

/// POST /api/admin/campaigns/:id/recompute
pub async fn recompute_campaign(
    Authorized(_): Authorized,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RecomputeReport>> {
    let id = campaign_id(&id)?;
    let report = state.engine.estimates().recompute(id).await?;
    Ok(Json(report))
}

/// GET /api/admin/campaigns/:id/logs
pub async fn campaign_logs(
    Authorized(_): Authorized,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<MetricFetchLog>>> {
    let id = campaign_id(&id)?;
    if state.store.get_campaign(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("campaign {}", id)));
    }
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    Ok(Json(state.store.fetch_logs(id, limit).await?))
}
