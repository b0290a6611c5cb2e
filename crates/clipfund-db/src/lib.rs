//! Clipfund Database Layer
//!
//! Durable state for the metrics scheduler and payout engine.
//!
//! # Architecture
//!
//! - [`Store`]: the async contract the engine is written against
//! - [`PgStore`]: PostgreSQL implementation, one repository per table
//! - [`MemoryStore`]: in-process implementation with identical semantics
//!
//! Every coordination primitive (metrics lease, submission freeze, webhook
//! dedup, settlement) is a single conditional statement or transaction, so any
//! number of stateless invocations can share one database.

pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod repos;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use clipfund_types::{
    Campaign, CampaignId, CampaignTransition, EngagementCounters, LeaseToken, LedgerTransaction,
    MetricFetchLog, PointsBreakdown, Submission, SubmissionId, UserId,
};

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use repos::*;
pub use store::{EarningsUpdate, NextFetch, SettlementPlan, Store};

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pub pg: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");
        Ok(Self { pg })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    pub fn campaign_repo(&self) -> CampaignRepo {
        CampaignRepo::new(self.pg.clone())
    }

    pub fn submission_repo(&self) -> SubmissionRepo {
        SubmissionRepo::new(self.pg.clone())
    }

    pub fn fetch_log_repo(&self) -> FetchLogRepo {
        FetchLogRepo::new(self.pg.clone())
    }

    pub fn ledger_repo(&self) -> LedgerRepo {
        LedgerRepo::new(self.pg.clone())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pg).await?;
        Ok(())
    }

    async fn insert_campaign(&self, campaign: &Campaign) -> DbResult<()> {
        self.campaign_repo().insert(campaign).await
    }

    async fn get_campaign(&self, id: CampaignId) -> DbResult<Option<Campaign>> {
        self.campaign_repo().find_by_id(id).await
    }

    async fn due_campaigns(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Campaign>> {
        self.campaign_repo().find_due(now, stale_before, limit).await
    }

    async fn try_acquire_metrics_lease(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        token: LeaseToken,
    ) -> DbResult<bool> {
        self.campaign_repo()
            .try_acquire_lease(id, now, stale_before, token)
            .await
    }

    async fn release_metrics_lease(
        &self,
        id: CampaignId,
        token: LeaseToken,
        next_fetch: NextFetch,
    ) -> DbResult<bool> {
        self.campaign_repo().release_lease(id, token, next_fetch).await
    }

    async fn set_campaign_total_points(&self, id: CampaignId, total_points: i64) -> DbResult<()> {
        self.campaign_repo().set_total_points(id, total_points).await
    }

    async fn campaigns_ending_before(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Campaign>> {
        self.campaign_repo().find_ending_before(cutoff).await
    }

    async fn lock_campaign(&self, id: CampaignId, now: DateTime<Utc>) -> DbResult<bool> {
        self.campaign_repo().lock(id, now).await
    }

    async fn ended_unsettled_campaigns(&self, now: DateTime<Utc>) -> DbResult<Vec<Campaign>> {
        self.campaign_repo().find_ended_unsettled(now).await
    }

    async fn begin_settlement(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Campaign>> {
        self.campaign_repo().begin_settlement(id, now).await
    }

    async fn mark_payout_failed(&self, id: CampaignId, reason: &str) -> DbResult<bool> {
        self.campaign_repo().mark_payout_failed(id, reason).await
    }

    async fn settle_campaign(&self, plan: &SettlementPlan) -> DbResult<Campaign> {
        self.ledger_repo().settle(plan).await
    }

    async fn record_transition(&self, transition: &CampaignTransition) -> DbResult<()> {
        self.campaign_repo().record_transition(transition).await
    }

    async fn transitions(&self, campaign_id: CampaignId) -> DbResult<Vec<CampaignTransition>> {
        self.campaign_repo().transitions(campaign_id).await
    }

    async fn insert_submission(&self, submission: &Submission) -> DbResult<()> {
        self.submission_repo().insert(submission).await
    }

    async fn get_submission(&self, id: SubmissionId) -> DbResult<Option<Submission>> {
        self.submission_repo().find_by_id(id).await
    }

    async fn stale_submissions(
        &self,
        campaign_id: CampaignId,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Submission>> {
        self.submission_repo().find_stale(campaign_id, cutoff, limit).await
    }

    async fn count_stale_submissions(
        &self,
        campaign_id: CampaignId,
        cutoff: DateTime<Utc>,
    ) -> DbResult<u64> {
        self.submission_repo().count_stale(campaign_id, cutoff).await
    }

    async fn apply_metrics(
        &self,
        id: SubmissionId,
        counters: EngagementCounters,
        points: PointsBreakdown,
        checked_at: DateTime<Utc>,
    ) -> DbResult<()> {
        self.submission_repo()
            .apply_metrics(id, counters, points, checked_at)
            .await
    }

    async fn reject_submission(&self, id: SubmissionId, reason: &str) -> DbResult<()> {
        self.submission_repo().reject(id, reason).await
    }

    async fn approved_submissions(&self, campaign_id: CampaignId) -> DbResult<Vec<Submission>> {
        self.submission_repo().list_approved(campaign_id).await
    }

    async fn match_live_submissions(&self, content_ids: &[String]) -> DbResult<Vec<Submission>> {
        self.submission_repo().match_live(content_ids).await
    }

    async fn write_estimates(&self, updates: &[EarningsUpdate]) -> DbResult<()> {
        self.submission_repo().write_estimates(updates).await
    }

    async fn append_fetch_log(&self, log: &MetricFetchLog) -> DbResult<bool> {
        self.fetch_log_repo().append(log).await
    }

    async fn webhook_event_seen(&self, event_id: &str) -> DbResult<bool> {
        self.fetch_log_repo().event_seen(event_id).await
    }

    async fn fetch_logs(
        &self,
        campaign_id: CampaignId,
        limit: u32,
    ) -> DbResult<Vec<MetricFetchLog>> {
        self.fetch_log_repo().list_by_campaign(campaign_id, limit).await
    }

    async fn link_provider_account(&self, account_id: &str, user_id: UserId) -> DbResult<()> {
        self.ledger_repo().link_account(account_id, user_id).await
    }

    async fn flag_reconnect(&self, account_id: &str) -> DbResult<Option<UserId>> {
        self.ledger_repo().flag_reconnect(account_id).await
    }

    async fn needs_reconnect(&self, user_id: UserId) -> DbResult<bool> {
        self.ledger_repo().needs_reconnect(user_id).await
    }

    async fn balance(&self, user_id: UserId) -> DbResult<Decimal> {
        self.ledger_repo().balance(user_id).await
    }

    async fn campaign_transactions(
        &self,
        campaign_id: CampaignId,
    ) -> DbResult<Vec<LedgerTransaction>> {
        self.ledger_repo().list_by_campaign(campaign_id).await
    }
}
