//! The durable store contract
//!
//! Every cross-invocation coordination point of the engine goes through this
//! trait: the metrics lease, the submission freeze, webhook event dedup and the
//! settlement unit. Implementations must perform each conditional method as a
//! single atomic check-and-set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use clipfund_types::{
    Campaign, CampaignId, CampaignTransition, EngagementCounters, LeaseToken, LedgerTransaction,
    MetricFetchLog, PointsBreakdown, Submission, SubmissionId, UserId,
};

use crate::DbResult;

/// What releasing the metrics lease does to `next_metrics_fetch_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextFetch {
    /// Leave it untouched; the next tick resumes the same cycle
    Keep,
    /// Overwrite it; `None` stops scheduling
    Set(Option<DateTime<Utc>>),
}

/// Contribution and earnings written back onto a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsUpdate {
    pub submission_id: SubmissionId,
    pub contribution_percent: Decimal,
    pub earnings: Decimal,
}

/// Everything settlement writes, applied as one atomic unit
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub campaign_id: CampaignId,
    pub settled_at: DateTime<Utc>,
    /// Subtracted from `remaining_budget`, saturating at zero
    pub pool: Decimal,
    /// Inserted COMPLETED; each amount is credited to its user's balance
    pub transactions: Vec<LedgerTransaction>,
    pub final_shares: Vec<EarningsUpdate>,
    pub transition: CampaignTransition,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap liveness probe
    async fn ping(&self) -> DbResult<()>;

    // ------------------------------------------------------------------
    // Campaigns
    // ------------------------------------------------------------------

    async fn insert_campaign(&self, campaign: &Campaign) -> DbResult<()>;

    async fn get_campaign(&self, id: CampaignId) -> DbResult<Option<Campaign>>;

    /// ACTIVE, unlocked, `next_metrics_fetch_at <= now`, lease free or older
    /// than `stale_before`; earliest due first
    async fn due_campaigns(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Campaign>>;

    /// Conditional update on the same predicates as [`Store::due_campaigns`].
    /// `false` means another invocation holds the lease.
    async fn try_acquire_metrics_lease(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        token: LeaseToken,
    ) -> DbResult<bool>;

    /// Clear the lease if `token` still owns it. `false` means the lease expired
    /// and was taken over; nothing is written in that case.
    async fn release_metrics_lease(
        &self,
        id: CampaignId,
        token: LeaseToken,
        next_fetch: NextFetch,
    ) -> DbResult<bool>;

    async fn set_campaign_total_points(&self, id: CampaignId, total_points: i64) -> DbResult<()>;

    /// ACTIVE, unlocked campaigns whose `end_date` is before `cutoff`
    async fn campaigns_ending_before(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Campaign>>;

    /// Set `locked_at` if unset. `false` when already locked.
    async fn lock_campaign(&self, id: CampaignId, now: DateTime<Utc>) -> DbResult<bool>;

    /// ACTIVE, locked, `end_date <= now`, payout not COMPLETED
    async fn ended_unsettled_campaigns(&self, now: DateTime<Utc>) -> DbResult<Vec<Campaign>>;

    /// Mark payout PENDING and lock the campaign if needed. Returns the updated
    /// campaign, or `None` when it is not ACTIVE or already paid.
    async fn begin_settlement(&self, id: CampaignId, now: DateTime<Utc>)
        -> DbResult<Option<Campaign>>;

    /// Record a failed attempt; never overwrites a COMPLETED payout
    async fn mark_payout_failed(&self, id: CampaignId, reason: &str) -> DbResult<bool>;

    /// Apply a settlement atomically. Fails with `AlreadySettled` when the payout
    /// is already COMPLETED, leaving every row untouched.
    async fn settle_campaign(&self, plan: &SettlementPlan) -> DbResult<Campaign>;

    async fn record_transition(&self, transition: &CampaignTransition) -> DbResult<()>;

    async fn transitions(&self, campaign_id: CampaignId) -> DbResult<Vec<CampaignTransition>>;

    // ------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------

    async fn insert_submission(&self, submission: &Submission) -> DbResult<()>;

    async fn get_submission(&self, id: SubmissionId) -> DbResult<Option<Submission>>;

    /// APPROVED submissions never checked or checked before `cutoff`, oldest first
    async fn stale_submissions(
        &self,
        campaign_id: CampaignId,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Submission>>;

    async fn count_stale_submissions(
        &self,
        campaign_id: CampaignId,
        cutoff: DateTime<Utc>,
    ) -> DbResult<u64>;

    /// Overwrite counters and points (last write wins) and stamp `last_checked_at`
    async fn apply_metrics(
        &self,
        id: SubmissionId,
        counters: EngagementCounters,
        points: PointsBreakdown,
        checked_at: DateTime<Utc>,
    ) -> DbResult<()>;

    async fn reject_submission(&self, id: SubmissionId, reason: &str) -> DbResult<()>;

    async fn approved_submissions(&self, campaign_id: CampaignId) -> DbResult<Vec<Submission>>;

    /// APPROVED submissions with one of `content_ids`, in ACTIVE unlocked campaigns
    async fn match_live_submissions(&self, content_ids: &[String]) -> DbResult<Vec<Submission>>;

    /// Live estimates; never touches the ledger
    async fn write_estimates(&self, updates: &[EarningsUpdate]) -> DbResult<()>;

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    /// Append a row. Returns `false` when a row with the same
    /// (webhook event id, submission id) already exists.
    async fn append_fetch_log(&self, log: &MetricFetchLog) -> DbResult<bool>;

    async fn webhook_event_seen(&self, event_id: &str) -> DbResult<bool>;

    /// Newest first
    async fn fetch_logs(&self, campaign_id: CampaignId, limit: u32)
        -> DbResult<Vec<MetricFetchLog>>;

    // ------------------------------------------------------------------
    // Users and ledger
    // ------------------------------------------------------------------

    async fn link_provider_account(&self, account_id: &str, user_id: UserId) -> DbResult<()>;

    /// Flag the owner of `account_id` for reconnection
    async fn flag_reconnect(&self, account_id: &str) -> DbResult<Option<UserId>>;

    async fn needs_reconnect(&self, user_id: UserId) -> DbResult<bool>;

    async fn balance(&self, user_id: UserId) -> DbResult<Decimal>;

    async fn campaign_transactions(&self, campaign_id: CampaignId)
        -> DbResult<Vec<LedgerTransaction>>;
}
