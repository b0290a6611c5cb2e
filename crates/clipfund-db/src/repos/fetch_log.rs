//! Metric fetch audit log repository

use sqlx::PgPool;

use clipfund_types::{CampaignId, MetricFetchLog};

use crate::models::DbFetchLog;
use crate::DbResult;

pub struct FetchLogRepo {
    pool: PgPool,
}

impl FetchLogRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert unless (event id, submission id) was already logged
    pub async fn append(&self, log: &MetricFetchLog) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO metric_fetch_logs
                (id, campaign_id, submission_id, source, status, error_message,
                 metrics_snapshot, webhook_event_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(log.id.as_uuid())
        .bind(log.campaign_id.map(|id| *id.as_uuid()))
        .bind(log.submission_id.map(|id| *id.as_uuid()))
        .bind(log.source.as_str())
        .bind(log.status.as_str())
        .bind(&log.error_message)
        .bind(&log.metrics_snapshot)
        .bind(&log.webhook_event_id)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn event_seen(&self, event_id: &str) -> DbResult<bool> {
        let seen: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM metric_fetch_logs WHERE webhook_event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(seen)
    }

    pub async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: u32,
    ) -> DbResult<Vec<MetricFetchLog>> {
        let rows = sqlx::query_as::<_, DbFetchLog>(
            r#"
            SELECT id, campaign_id, submission_id, source, status, error_message,
                   metrics_snapshot, webhook_event_id, created_at
            FROM metric_fetch_logs
            WHERE campaign_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(campaign_id.as_uuid())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MetricFetchLog::try_from).collect()
    }
}
