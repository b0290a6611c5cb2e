//! Submission repository

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use clipfund_types::{CampaignId, EngagementCounters, PointsBreakdown, Submission, SubmissionId};

use crate::models::{count_to_db, DbSubmission};
use crate::store::EarningsUpdate;
use crate::{DbError, DbResult};

const SUBMISSION_COLUMNS: &str = "s.id, s.campaign_id, s.creator_id, s.status, s.content_url, \
    s.external_content_id, s.provider_account_id, s.view_count, s.like_count, s.comment_count, \
    s.share_count, s.view_points, s.like_points, s.share_points, s.total_points, \
    s.contribution_percent, s.total_earnings, s.last_checked_at, s.rejection_reason, s.created_at";

fn into_submissions(rows: Vec<DbSubmission>) -> DbResult<Vec<Submission>> {
    rows.into_iter().map(Submission::try_from).collect()
}

pub struct SubmissionRepo {
    pool: PgPool,
}

impl SubmissionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, s: &Submission) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO submissions
                (id, campaign_id, creator_id, status, content_url, external_content_id,
                 provider_account_id, view_count, like_count, comment_count, share_count,
                 view_points, like_points, share_points, total_points, contribution_percent,
                 total_earnings, last_checked_at, rejection_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20)
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(s.campaign_id.as_uuid())
        .bind(s.creator_id.as_uuid())
        .bind(s.status.as_str())
        .bind(&s.content_url)
        .bind(&s.external_content_id)
        .bind(&s.provider_account_id)
        .bind(count_to_db(s.counters.views))
        .bind(count_to_db(s.counters.likes))
        .bind(count_to_db(s.counters.comments))
        .bind(count_to_db(s.counters.shares))
        .bind(s.points.view_points)
        .bind(s.points.like_points)
        .bind(s.points.share_points)
        .bind(s.points.total_points)
        .bind(s.contribution_percent)
        .bind(s.total_earnings)
        .bind(s.last_checked_at)
        .bind(&s.rejection_reason)
        .bind(s.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: SubmissionId) -> DbResult<Option<Submission>> {
        let sql = format!("SELECT {} FROM submissions s WHERE s.id = $1", SUBMISSION_COLUMNS);
        let row = sqlx::query_as::<_, DbSubmission>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Submission::try_from).transpose()
    }

    pub async fn find_stale(
        &self,
        campaign_id: CampaignId,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Submission>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM submissions s
            WHERE s.campaign_id = $1
              AND s.status = 'APPROVED'
              AND (s.last_checked_at IS NULL OR s.last_checked_at < $2)
            ORDER BY s.last_checked_at ASC NULLS FIRST, s.created_at ASC, s.id ASC
            LIMIT $3
            "#,
            SUBMISSION_COLUMNS
        );
        let rows = sqlx::query_as::<_, DbSubmission>(&sql)
            .bind(campaign_id.as_uuid())
            .bind(cutoff)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        into_submissions(rows)
    }

    pub async fn count_stale(&self, campaign_id: CampaignId, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM submissions
            WHERE campaign_id = $1
              AND status = 'APPROVED'
              AND (last_checked_at IS NULL OR last_checked_at < $2)
            "#,
        )
        .bind(campaign_id.as_uuid())
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub async fn apply_metrics(
        &self,
        id: SubmissionId,
        counters: EngagementCounters,
        points: PointsBreakdown,
        checked_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET view_count = $2, like_count = $3, comment_count = $4, share_count = $5,
                view_points = $6, like_points = $7, share_points = $8, total_points = $9,
                last_checked_at = $10
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(count_to_db(counters.views))
        .bind(count_to_db(counters.likes))
        .bind(count_to_db(counters.comments))
        .bind(count_to_db(counters.shares))
        .bind(points.view_points)
        .bind(points.like_points)
        .bind(points.share_points)
        .bind(points.total_points)
        .bind(checked_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("submission {}", id)));
        }
        Ok(())
    }

    pub async fn reject(&self, id: SubmissionId, reason: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE submissions SET status = 'REJECTED', rejection_reason = $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("submission {}", id)));
        }
        Ok(())
    }

    pub async fn list_approved(&self, campaign_id: CampaignId) -> DbResult<Vec<Submission>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM submissions s
            WHERE s.campaign_id = $1 AND s.status = 'APPROVED'
            ORDER BY s.created_at ASC, s.id ASC
            "#,
            SUBMISSION_COLUMNS
        );
        let rows = sqlx::query_as::<_, DbSubmission>(&sql)
            .bind(campaign_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        into_submissions(rows)
    }

    /// Late pushes for locked or inactive campaigns never match
    pub async fn match_live(&self, content_ids: &[String]) -> DbResult<Vec<Submission>> {
        if content_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {}
            FROM submissions s
            JOIN campaigns c ON c.id = s.campaign_id
            WHERE s.external_content_id = ANY($1)
              AND s.status = 'APPROVED'
              AND c.status = 'ACTIVE'
              AND c.locked_at IS NULL
            ORDER BY s.created_at ASC, s.id ASC
            "#,
            SUBMISSION_COLUMNS
        );
        let rows = sqlx::query_as::<_, DbSubmission>(&sql)
            .bind(content_ids)
            .fetch_all(&self.pool)
            .await?;
        into_submissions(rows)
    }

    pub async fn write_estimates(&self, updates: &[EarningsUpdate]) -> DbResult<()> {
        update_earnings(&self.pool, updates).await
    }
}

/// Bulk contribution/earnings write, shared with the settlement transaction
pub(crate) async fn update_earnings<'e, E>(executor: E, updates: &[EarningsUpdate]) -> DbResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    if updates.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = updates.iter().map(|u| *u.submission_id.as_uuid()).collect();
    let percents: Vec<Decimal> = updates.iter().map(|u| u.contribution_percent).collect();
    let earnings: Vec<Decimal> = updates.iter().map(|u| u.earnings).collect();

    sqlx::query(
        r#"
        UPDATE submissions AS s
        SET contribution_percent = u.contribution_percent,
            total_earnings = u.earnings
        FROM UNNEST($1::uuid[], $2::numeric[], $3::numeric[])
            AS u(id, contribution_percent, earnings)
        WHERE s.id = u.id
        "#,
    )
    .bind(&ids)
    .bind(&percents)
    .bind(&earnings)
    .execute(executor)
    .await?;
    Ok(())
}
