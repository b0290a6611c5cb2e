//! Campaign repository: scheduling, lease and lock updates

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clipfund_types::{Campaign, CampaignId, CampaignTransition, LeaseToken};

use crate::models::{count_to_db, DbCampaign, DbTransition};
use crate::store::NextFetch;
use crate::{DbError, DbResult};

pub(crate) const CAMPAIGN_COLUMNS: &str = "id, artist_id, title, status, total_budget, \
    remaining_budget, platform_fee_percent, safety_reserve_percent, total_points, start_date, \
    end_date, locked_at, metrics_processing_at, metrics_lease_token, next_metrics_fetch_at, \
    payout_status, payout_error, completed_at, min_submissions, min_points, min_views, \
    created_at, updated_at";

fn into_campaigns(rows: Vec<DbCampaign>) -> DbResult<Vec<Campaign>> {
    rows.into_iter().map(Campaign::try_from).collect()
}

pub struct CampaignRepo {
    pool: PgPool,
}

impl CampaignRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, c: &Campaign) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaigns
                (id, artist_id, title, status, total_budget, remaining_budget,
                 platform_fee_percent, safety_reserve_percent, total_points, start_date, end_date,
                 locked_at, metrics_processing_at, metrics_lease_token, next_metrics_fetch_at,
                 payout_status, payout_error, completed_at, min_submissions, min_points, min_views,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(c.id.as_uuid())
        .bind(c.artist_id.as_uuid())
        .bind(&c.title)
        .bind(c.status.as_str())
        .bind(c.total_budget)
        .bind(c.remaining_budget)
        .bind(c.platform_fee_percent)
        .bind(c.safety_reserve_percent)
        .bind(c.total_points)
        .bind(c.start_date)
        .bind(c.end_date)
        .bind(c.locked_at)
        .bind(c.metrics_processing_at)
        .bind(c.metrics_lease_token.map(|t| *t.as_uuid()))
        .bind(c.next_metrics_fetch_at)
        .bind(c.payout_status.map(|p| p.as_str()))
        .bind(&c.payout_error)
        .bind(c.completed_at)
        .bind(i32::try_from(c.insurance.min_submissions).unwrap_or(i32::MAX))
        .bind(c.insurance.min_points)
        .bind(count_to_db(c.insurance.min_views))
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DbError::InvalidInput(format!("campaign {} exists", c.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(&self, id: CampaignId) -> DbResult<Option<Campaign>> {
        let sql = format!("SELECT {} FROM campaigns WHERE id = $1", CAMPAIGN_COLUMNS);
        let row = sqlx::query_as::<_, DbCampaign>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Campaign::try_from).transpose()
    }

    pub async fn find_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Campaign>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM campaigns
            WHERE status = 'ACTIVE'
              AND locked_at IS NULL
              AND next_metrics_fetch_at <= $1
              AND (metrics_processing_at IS NULL OR metrics_processing_at < $2)
            ORDER BY next_metrics_fetch_at ASC, id ASC
            LIMIT $3
            "#,
            CAMPAIGN_COLUMNS
        );
        let rows = sqlx::query_as::<_, DbCampaign>(&sql)
            .bind(now)
            .bind(stale_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        into_campaigns(rows)
    }

    /// Single conditional update; zero rows means the race was lost
    pub async fn try_acquire_lease(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        token: LeaseToken,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET metrics_processing_at = $2, metrics_lease_token = $3, updated_at = $2
            WHERE id = $1
              AND status = 'ACTIVE'
              AND locked_at IS NULL
              AND next_metrics_fetch_at <= $2
              AND (metrics_processing_at IS NULL OR metrics_processing_at < $4)
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .bind(token.as_uuid())
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lease(
        &self,
        id: CampaignId,
        token: LeaseToken,
        next_fetch: NextFetch,
    ) -> DbResult<bool> {
        let (keep, next) = match next_fetch {
            NextFetch::Keep => (true, None),
            NextFetch::Set(next) => (false, next),
        };
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET metrics_processing_at = NULL,
                metrics_lease_token = NULL,
                next_metrics_fetch_at = CASE WHEN $3 THEN next_metrics_fetch_at ELSE $4 END,
                updated_at = NOW()
            WHERE id = $1 AND metrics_lease_token = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(token.as_uuid())
        .bind(keep)
        .bind(next)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_total_points(&self, id: CampaignId, total_points: i64) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE campaigns SET total_points = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(total_points)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("campaign {}", id)));
        }
        Ok(())
    }

    pub async fn find_ending_before(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Campaign>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM campaigns
            WHERE status = 'ACTIVE' AND locked_at IS NULL AND end_date < $1
            ORDER BY end_date ASC, id ASC
            "#,
            CAMPAIGN_COLUMNS
        );
        let rows = sqlx::query_as::<_, DbCampaign>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        into_campaigns(rows)
    }

    pub async fn lock(&self, id: CampaignId, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET locked_at = $2, updated_at = $2 WHERE id = $1 AND locked_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn find_ended_unsettled(&self, now: DateTime<Utc>) -> DbResult<Vec<Campaign>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM campaigns
            WHERE status = 'ACTIVE'
              AND locked_at IS NOT NULL
              AND end_date <= $1
              AND payout_status IS DISTINCT FROM 'COMPLETED'
            ORDER BY end_date ASC, id ASC
            "#,
            CAMPAIGN_COLUMNS
        );
        let rows = sqlx::query_as::<_, DbCampaign>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        into_campaigns(rows)
    }

    pub async fn begin_settlement(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Campaign>> {
        let sql = format!(
            r#"
            UPDATE campaigns
            SET locked_at = COALESCE(locked_at, $2), payout_status = 'PENDING', updated_at = $2
            WHERE id = $1
              AND status = 'ACTIVE'
              AND payout_status IS DISTINCT FROM 'COMPLETED'
            RETURNING {}
            "#,
            CAMPAIGN_COLUMNS
        );
        let row = sqlx::query_as::<_, DbCampaign>(&sql)
            .bind(id.as_uuid())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Campaign::try_from).transpose()
    }

    pub async fn mark_payout_failed(&self, id: CampaignId, reason: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET payout_status = 'FAILED', payout_error = $2, updated_at = NOW()
            WHERE id = $1 AND payout_status IS DISTINCT FROM 'COMPLETED'
            "#,
        )
        .bind(id.as_uuid())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn record_transition(&self, t: &CampaignTransition) -> DbResult<()> {
        insert_transition(&self.pool, t).await
    }

    pub async fn transitions(&self, campaign_id: CampaignId) -> DbResult<Vec<CampaignTransition>> {
        let rows = sqlx::query_as::<_, DbTransition>(
            r#"
            SELECT id, campaign_id, from_phase, to_phase, reason, at
            FROM campaign_transitions
            WHERE campaign_id = $1
            ORDER BY at ASC
            "#,
        )
        .bind(campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CampaignTransition::from).collect())
    }
}

/// Shared by the repository and the settlement transaction
pub(crate) async fn insert_transition<'e, E>(executor: E, t: &CampaignTransition) -> DbResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO campaign_transitions (id, campaign_id, from_phase, to_phase, reason, at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(t.id.as_uuid())
    .bind(t.campaign_id.as_uuid())
    .bind(&t.from_phase)
    .bind(&t.to_phase)
    .bind(&t.reason)
    .bind(t.at)
    .execute(executor)
    .await?;
    Ok(())
}
