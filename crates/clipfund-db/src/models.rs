//! Database models - mapped from PostgreSQL tables
//!
//! Rows keep the column types Postgres hands back (`i64` counters, `TEXT`
//! enums) and convert into domain types through `TryFrom`, so a corrupt row
//! surfaces as [`DbError::CorruptRow`] instead of a panic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use clipfund_types::{
    Campaign, CampaignId, CampaignTransition, EngagementCounters, FetchLogId, InsuranceThresholds,
    LeaseToken, LedgerTransaction, MetricFetchLog, PayoutStatus, PointsBreakdown, Submission,
    SubmissionId, TransactionId, TransitionId, UserId,
};

use crate::DbError;

/// Counters are `u64` in the domain and `BIGINT` in storage
pub(crate) fn count_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn count_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

// ============================================================================
// Campaigns
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct DbCampaign {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub title: String,
    pub status: String,
    pub total_budget: Decimal,
    pub remaining_budget: Decimal,
    pub platform_fee_percent: Decimal,
    pub safety_reserve_percent: Decimal,
    pub total_points: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub metrics_processing_at: Option<DateTime<Utc>>,
    pub metrics_lease_token: Option<Uuid>,
    pub next_metrics_fetch_at: Option<DateTime<Utc>>,
    pub payout_status: Option<String>,
    pub payout_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub min_submissions: i32,
    pub min_points: i64,
    pub min_views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbCampaign> for Campaign {
    type Error = DbError;

    fn try_from(row: DbCampaign) -> Result<Self, Self::Error> {
        Ok(Campaign {
            id: CampaignId::from_uuid(row.id),
            artist_id: UserId::from_uuid(row.artist_id),
            title: row.title,
            status: row.status.parse()?,
            total_budget: row.total_budget,
            remaining_budget: row.remaining_budget,
            platform_fee_percent: row.platform_fee_percent,
            safety_reserve_percent: row.safety_reserve_percent,
            total_points: row.total_points,
            start_date: row.start_date,
            end_date: row.end_date,
            locked_at: row.locked_at,
            metrics_processing_at: row.metrics_processing_at,
            metrics_lease_token: row.metrics_lease_token.map(LeaseToken::from_uuid),
            next_metrics_fetch_at: row.next_metrics_fetch_at,
            payout_status: row
                .payout_status
                .as_deref()
                .map(str::parse::<PayoutStatus>)
                .transpose()?,
            payout_error: row.payout_error,
            completed_at: row.completed_at,
            insurance: InsuranceThresholds {
                min_submissions: u32::try_from(row.min_submissions).unwrap_or(0),
                min_points: row.min_points,
                min_views: count_from_db(row.min_views),
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Submissions
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct DbSubmission {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub creator_id: Uuid,
    pub status: String,
    pub content_url: String,
    pub external_content_id: String,
    pub provider_account_id: Option<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub view_points: i64,
    pub like_points: i64,
    pub share_points: i64,
    pub total_points: i64,
    pub contribution_percent: Decimal,
    pub total_earnings: Decimal,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbSubmission> for Submission {
    type Error = DbError;

    fn try_from(row: DbSubmission) -> Result<Self, Self::Error> {
        Ok(Submission {
            id: SubmissionId::from_uuid(row.id),
            campaign_id: CampaignId::from_uuid(row.campaign_id),
            creator_id: UserId::from_uuid(row.creator_id),
            status: row.status.parse()?,
            content_url: row.content_url,
            external_content_id: row.external_content_id,
            provider_account_id: row.provider_account_id,
            counters: EngagementCounters {
                views: count_from_db(row.view_count),
                likes: count_from_db(row.like_count),
                comments: count_from_db(row.comment_count),
                shares: count_from_db(row.share_count),
            },
            points: PointsBreakdown {
                view_points: row.view_points,
                like_points: row.like_points,
                share_points: row.share_points,
                total_points: row.total_points,
            },
            contribution_percent: row.contribution_percent,
            total_earnings: row.total_earnings,
            last_checked_at: row.last_checked_at,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
        })
    }
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct DbFetchLog {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub submission_id: Option<Uuid>,
    pub source: String,
    pub status: String,
    pub error_message: Option<String>,
    pub metrics_snapshot: Option<serde_json::Value>,
    pub webhook_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbFetchLog> for MetricFetchLog {
    type Error = DbError;

    fn try_from(row: DbFetchLog) -> Result<Self, Self::Error> {
        Ok(MetricFetchLog {
            id: FetchLogId::from_uuid(row.id),
            campaign_id: row.campaign_id.map(CampaignId::from_uuid),
            submission_id: row.submission_id.map(SubmissionId::from_uuid),
            source: row.source.parse()?,
            status: row.status.parse()?,
            error_message: row.error_message,
            metrics_snapshot: row.metrics_snapshot,
            webhook_event_id: row.webhook_event_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTransition {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub from_phase: String,
    pub to_phase: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl From<DbTransition> for CampaignTransition {
    fn from(row: DbTransition) -> Self {
        CampaignTransition {
            id: TransitionId::from_uuid(row.id),
            campaign_id: CampaignId::from_uuid(row.campaign_id),
            from_phase: row.from_phase,
            to_phase: row.to_phase,
            reason: row.reason,
            at: row.at,
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct DbTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tx_type: String,
    pub amount: Decimal,
    pub status: String,
    pub campaign_id: Option<Uuid>,
    pub submission_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbTransaction> for LedgerTransaction {
    type Error = DbError;

    fn try_from(row: DbTransaction) -> Result<Self, Self::Error> {
        Ok(LedgerTransaction {
            id: TransactionId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            tx_type: row.tx_type.parse()?,
            amount: row.amount,
            status: row.status.parse()?,
            campaign_id: row.campaign_id.map(CampaignId::from_uuid),
            submission_id: row.submission_id.map(SubmissionId::from_uuid),
            description: row.description,
            created_at: row.created_at,
        })
    }
}
