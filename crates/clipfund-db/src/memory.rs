//! In-memory store
//!
//! Same conditional-update semantics as the Postgres store, with one write lock
//! standing in for row locks and transactions. Used by tests and `--in-memory`
//! development runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use clipfund_types::{
    Campaign, CampaignId, CampaignStatus, CampaignTransition, EngagementCounters, LeaseToken,
    LedgerTransaction, MetricFetchLog, PayoutStatus, PointsBreakdown, Submission, SubmissionId,
    SubmissionStatus, UserId,
};

use crate::store::{EarningsUpdate, NextFetch, SettlementPlan, Store};
use crate::{DbError, DbResult};

#[derive(Default)]
struct State {
    campaigns: HashMap<CampaignId, Campaign>,
    submissions: HashMap<SubmissionId, Submission>,
    logs: Vec<MetricFetchLog>,
    log_keys: HashSet<(String, Option<SubmissionId>)>,
    transitions: Vec<CampaignTransition>,
    transactions: Vec<LedgerTransaction>,
    balances: HashMap<UserId, Decimal>,
    accounts: HashMap<String, UserId>,
    reconnect: HashSet<UserId>,
    audit_offline: bool,
}

fn is_due(c: &Campaign, now: DateTime<Utc>, stale_before: DateTime<Utc>) -> bool {
    c.status == CampaignStatus::Active
        && c.locked_at.is_none()
        && matches!(c.next_metrics_fetch_at, Some(at) if at <= now)
        && c.metrics_processing_at.map_or(true, |at| at < stale_before)
}

fn is_stale_approved(s: &Submission, campaign_id: CampaignId, cutoff: DateTime<Utc>) -> bool {
    s.campaign_id == campaign_id && s.status == SubmissionStatus::Approved && s.is_stale(cutoff)
}

/// Shared in-memory store; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit row, oldest first
    pub async fn all_fetch_logs(&self) -> Vec<MetricFetchLog> {
        self.state.read().await.logs.clone()
    }

    /// Make audit log writes fail until switched back, to exercise error paths
    pub async fn set_audit_offline(&self, offline: bool) {
        self.state.write().await.audit_offline = offline;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }

    async fn insert_campaign(&self, campaign: &Campaign) -> DbResult<()> {
        let mut state = self.state.write().await;
        if state.campaigns.contains_key(&campaign.id) {
            return Err(DbError::InvalidInput(format!("campaign {} exists", campaign.id)));
        }
        state.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn get_campaign(&self, id: CampaignId) -> DbResult<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn due_campaigns(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut due: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| is_due(c, now, stale_before))
            .cloned()
            .collect();
        due.sort_by_key(|c| (c.next_metrics_fetch_at, c.id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn try_acquire_metrics_lease(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        token: LeaseToken,
    ) -> DbResult<bool> {
        let mut state = self.state.write().await;
        match state.campaigns.get_mut(&id) {
            Some(c) if is_due(c, now, stale_before) => {
                c.metrics_processing_at = Some(now);
                c.metrics_lease_token = Some(token);
                c.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_metrics_lease(
        &self,
        id: CampaignId,
        token: LeaseToken,
        next_fetch: NextFetch,
    ) -> DbResult<bool> {
        let mut state = self.state.write().await;
        match state.campaigns.get_mut(&id) {
            Some(c) if c.metrics_lease_token == Some(token) => {
                c.metrics_processing_at = None;
                c.metrics_lease_token = None;
                if let NextFetch::Set(next) = next_fetch {
                    c.next_metrics_fetch_at = next;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_campaign_total_points(&self, id: CampaignId, total_points: i64) -> DbResult<()> {
        let mut state = self.state.write().await;
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("campaign {}", id)))?;
        campaign.total_points = total_points;
        Ok(())
    }

    async fn campaigns_ending_before(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut ending: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Active && c.locked_at.is_none() && c.end_date < cutoff
            })
            .cloned()
            .collect();
        ending.sort_by_key(|c| (c.end_date, c.id));
        Ok(ending)
    }

    async fn lock_campaign(&self, id: CampaignId, now: DateTime<Utc>) -> DbResult<bool> {
        let mut state = self.state.write().await;
        match state.campaigns.get_mut(&id) {
            Some(c) if c.locked_at.is_none() => {
                c.locked_at = Some(now);
                c.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(DbError::NotFound(format!("campaign {}", id))),
        }
    }

    async fn ended_unsettled_campaigns(&self, now: DateTime<Utc>) -> DbResult<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut ended: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.awaiting_settlement(now))
            .cloned()
            .collect();
        ended.sort_by_key(|c| (c.end_date, c.id));
        Ok(ended)
    }

    async fn begin_settlement(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Campaign>> {
        let mut state = self.state.write().await;
        match state.campaigns.get_mut(&id) {
            Some(c) if c.status == CampaignStatus::Active && !c.is_settled() => {
                if c.locked_at.is_none() {
                    c.locked_at = Some(now);
                }
                c.payout_status = Some(PayoutStatus::Pending);
                c.updated_at = now;
                Ok(Some(c.clone()))
            }
            Some(_) => Ok(None),
            None => Err(DbError::NotFound(format!("campaign {}", id))),
        }
    }

    async fn mark_payout_failed(&self, id: CampaignId, reason: &str) -> DbResult<bool> {
        let mut state = self.state.write().await;
        match state.campaigns.get_mut(&id) {
            Some(c) if !c.is_settled() => {
                c.payout_status = Some(PayoutStatus::Failed);
                c.payout_error = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn settle_campaign(&self, plan: &SettlementPlan) -> DbResult<Campaign> {
        let mut state = self.state.write().await;

        // validate everything before the first write
        let campaign = state
            .campaigns
            .get(&plan.campaign_id)
            .ok_or_else(|| DbError::NotFound(format!("campaign {}", plan.campaign_id)))?;
        if campaign.is_settled() {
            return Err(DbError::AlreadySettled(plan.campaign_id.to_string()));
        }
        if campaign.status != CampaignStatus::Active {
            return Err(DbError::InvalidInput(format!(
                "campaign {} is {}",
                plan.campaign_id, campaign.status
            )));
        }
        if let Some(missing) = plan
            .final_shares
            .iter()
            .find(|u| !state.submissions.contains_key(&u.submission_id))
        {
            return Err(DbError::NotFound(format!("submission {}", missing.submission_id)));
        }

        for tx in &plan.transactions {
            *state.balances.entry(tx.user_id).or_insert(Decimal::ZERO) += tx.amount;
            state.transactions.push(tx.clone());
        }
        for update in &plan.final_shares {
            if let Some(s) = state.submissions.get_mut(&update.submission_id) {
                s.contribution_percent = update.contribution_percent;
                s.total_earnings = update.earnings;
            }
        }
        state.transitions.push(plan.transition.clone());

        let campaign = state
            .campaigns
            .get_mut(&plan.campaign_id)
            .ok_or_else(|| DbError::NotFound(format!("campaign {}", plan.campaign_id)))?;
        campaign.status = CampaignStatus::Completed;
        campaign.payout_status = Some(PayoutStatus::Completed);
        campaign.payout_error = None;
        campaign.completed_at = Some(plan.settled_at);
        campaign.locked_at = campaign.locked_at.or(Some(plan.settled_at));
        campaign.remaining_budget = (campaign.remaining_budget - plan.pool).max(Decimal::ZERO);
        campaign.metrics_processing_at = None;
        campaign.metrics_lease_token = None;
        campaign.next_metrics_fetch_at = None;
        campaign.updated_at = plan.settled_at;
        Ok(campaign.clone())
    }

    async fn record_transition(&self, transition: &CampaignTransition) -> DbResult<()> {
        self.state.write().await.transitions.push(transition.clone());
        Ok(())
    }

    async fn transitions(&self, campaign_id: CampaignId) -> DbResult<Vec<CampaignTransition>> {
        let state = self.state.read().await;
        Ok(state
            .transitions
            .iter()
            .filter(|t| t.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn insert_submission(&self, submission: &Submission) -> DbResult<()> {
        let mut state = self.state.write().await;
        if !state.campaigns.contains_key(&submission.campaign_id) {
            return Err(DbError::NotFound(format!("campaign {}", submission.campaign_id)));
        }
        state.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get_submission(&self, id: SubmissionId) -> DbResult<Option<Submission>> {
        Ok(self.state.read().await.submissions.get(&id).cloned())
    }

    async fn stale_submissions(
        &self,
        campaign_id: CampaignId,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Submission>> {
        let state = self.state.read().await;
        let mut stale: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| is_stale_approved(s, campaign_id, cutoff))
            .cloned()
            .collect();
        // None sorts first: never-checked submissions lead
        stale.sort_by_key(|s| (s.last_checked_at, s.created_at, s.id));
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn count_stale_submissions(
        &self,
        campaign_id: CampaignId,
        cutoff: DateTime<Utc>,
    ) -> DbResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .submissions
            .values()
            .filter(|s| is_stale_approved(s, campaign_id, cutoff))
            .count() as u64)
    }

    async fn apply_metrics(
        &self,
        id: SubmissionId,
        counters: EngagementCounters,
        points: PointsBreakdown,
        checked_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut state = self.state.write().await;
        let submission = state
            .submissions
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("submission {}", id)))?;
        submission.counters = counters;
        submission.points = points;
        submission.last_checked_at = Some(checked_at);
        Ok(())
    }

    async fn reject_submission(&self, id: SubmissionId, reason: &str) -> DbResult<()> {
        let mut state = self.state.write().await;
        let submission = state
            .submissions
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("submission {}", id)))?;
        submission.status = SubmissionStatus::Rejected;
        submission.rejection_reason = Some(reason.to_string());
        Ok(())
    }

    async fn approved_submissions(&self, campaign_id: CampaignId) -> DbResult<Vec<Submission>> {
        let state = self.state.read().await;
        let mut approved: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| s.campaign_id == campaign_id && s.is_approved())
            .cloned()
            .collect();
        approved.sort_by_key(|s| (s.created_at, s.id));
        Ok(approved)
    }

    async fn match_live_submissions(&self, content_ids: &[String]) -> DbResult<Vec<Submission>> {
        let wanted: HashSet<&str> = content_ids.iter().map(String::as_str).collect();
        let state = self.state.read().await;
        let mut matched: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| s.is_approved() && wanted.contains(s.external_content_id.as_str()))
            .filter(|s| {
                state.campaigns.get(&s.campaign_id).map_or(false, |c| {
                    c.status == CampaignStatus::Active && c.locked_at.is_none()
                })
            })
            .cloned()
            .collect();
        matched.sort_by_key(|s| (s.created_at, s.id));
        Ok(matched)
    }

    async fn write_estimates(&self, updates: &[EarningsUpdate]) -> DbResult<()> {
        let mut state = self.state.write().await;
        for update in updates {
            if let Some(s) = state.submissions.get_mut(&update.submission_id) {
                s.contribution_percent = update.contribution_percent;
                s.total_earnings = update.earnings;
            }
        }
        Ok(())
    }

    async fn append_fetch_log(&self, log: &MetricFetchLog) -> DbResult<bool> {
        let mut state = self.state.write().await;
        if state.audit_offline {
            return Err(DbError::Connection("audit log offline".into()));
        }
        if let Some(event_id) = &log.webhook_event_id {
            if !state.log_keys.insert((event_id.clone(), log.submission_id)) {
                return Ok(false);
            }
        }
        state.logs.push(log.clone());
        Ok(true)
    }

    async fn webhook_event_seen(&self, event_id: &str) -> DbResult<bool> {
        let state = self.state.read().await;
        Ok(state.log_keys.iter().any(|(id, _)| id == event_id))
    }

    async fn fetch_logs(
        &self,
        campaign_id: CampaignId,
        limit: u32,
    ) -> DbResult<Vec<MetricFetchLog>> {
        let state = self.state.read().await;
        Ok(state
            .logs
            .iter()
            .rev()
            .filter(|l| l.campaign_id == Some(campaign_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn link_provider_account(&self, account_id: &str, user_id: UserId) -> DbResult<()> {
        self.state
            .write()
            .await
            .accounts
            .insert(account_id.to_string(), user_id);
        Ok(())
    }

    async fn flag_reconnect(&self, account_id: &str) -> DbResult<Option<UserId>> {
        let mut state = self.state.write().await;
        let Some(user_id) = state.accounts.get(account_id).copied() else {
            return Ok(None);
        };
        state.reconnect.insert(user_id);
        Ok(Some(user_id))
    }

    async fn needs_reconnect(&self, user_id: UserId) -> DbResult<bool> {
        Ok(self.state.read().await.reconnect.contains(&user_id))
    }

    async fn balance(&self, user_id: UserId) -> DbResult<Decimal> {
        let state = self.state.read().await;
        Ok(state.balances.get(&user_id).copied().unwrap_or(Decimal::ZERO))
    }

    async fn campaign_transactions(
        &self,
        campaign_id: CampaignId,
    ) -> DbResult<Vec<LedgerTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.campaign_id == Some(campaign_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clipfund_types::{
        CampaignPhase, FetchSource, FetchStatus, InsuranceThresholds, TransactionId,
        TransactionStatus, TransactionType,
    };
    use rust_decimal_macros::dec;

    fn campaign(now: DateTime<Utc>) -> Campaign {
        Campaign {
            id: CampaignId::new(),
            artist_id: UserId::new(),
            title: "Night drive".into(),
            status: CampaignStatus::Active,
            total_budget: dec!(10000),
            remaining_budget: dec!(10000),
            platform_fee_percent: dec!(10),
            safety_reserve_percent: dec!(5),
            total_points: 0,
            start_date: now - Duration::days(3),
            end_date: now + Duration::days(10),
            locked_at: None,
            metrics_processing_at: None,
            metrics_lease_token: None,
            next_metrics_fetch_at: Some(now - Duration::minutes(1)),
            payout_status: None,
            payout_error: None,
            completed_at: None,
            insurance: InsuranceThresholds {
                min_submissions: 3,
                min_points: 500,
                min_views: 50_000,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn submission(campaign_id: CampaignId, content_id: &str, now: DateTime<Utc>) -> Submission {
        Submission {
            id: SubmissionId::new(),
            campaign_id,
            creator_id: UserId::new(),
            status: SubmissionStatus::Approved,
            content_url: format!("https://video.example/{}", content_id),
            external_content_id: content_id.to_string(),
            provider_account_id: None,
            counters: EngagementCounters::default(),
            points: PointsBreakdown::default(),
            contribution_percent: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            last_checked_at: None,
            rejection_reason: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_stale() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let c = campaign(now);
        store.insert_campaign(&c).await.unwrap();

        let stale_before = now - Duration::minutes(10);
        let first = LeaseToken::new();
        assert!(store.try_acquire_metrics_lease(c.id, now, stale_before, first).await.unwrap());
        assert!(!store
            .try_acquire_metrics_lease(c.id, now, stale_before, LeaseToken::new())
            .await
            .unwrap());
        assert!(store.due_campaigns(now, stale_before, 3).await.unwrap().is_empty());

        // eleven minutes later the lease is up for grabs
        let later = now + Duration::minutes(11);
        let second = LeaseToken::new();
        assert!(store
            .try_acquire_metrics_lease(c.id, later, later - Duration::minutes(10), second)
            .await
            .unwrap());

        // the original holder can no longer release
        assert!(!store.release_metrics_lease(c.id, first, NextFetch::Set(None)).await.unwrap());
        let current = store.get_campaign(c.id).await.unwrap().unwrap();
        assert_eq!(current.metrics_lease_token, Some(second));
        assert!(current.next_metrics_fetch_at.is_some());

        assert!(store.release_metrics_lease(c.id, second, NextFetch::Keep).await.unwrap());
        let released = store.get_campaign(c.id).await.unwrap().unwrap();
        assert!(released.metrics_processing_at.is_none());
        assert_eq!(released.next_metrics_fetch_at, c.next_metrics_fetch_at);
    }

    #[tokio::test]
    async fn stale_selection_is_oldest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let c = campaign(now);
        store.insert_campaign(&c).await.unwrap();

        let fresh = Submission {
            last_checked_at: Some(now),
            ..submission(c.id, "fresh", now)
        };
        let old = Submission {
            last_checked_at: Some(now - Duration::days(2)),
            ..submission(c.id, "old", now)
        };
        let never = submission(c.id, "never", now);
        let rejected = Submission {
            status: SubmissionStatus::Rejected,
            ..submission(c.id, "gone", now)
        };
        for s in [&fresh, &old, &never, &rejected] {
            store.insert_submission(s).await.unwrap();
        }

        let cutoff = now - Duration::hours(23);
        let stale = store.stale_submissions(c.id, cutoff, 10).await.unwrap();
        let ids: Vec<SubmissionId> = stale.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![never.id, old.id]);
        assert_eq!(store.count_stale_submissions(c.id, cutoff).await.unwrap(), 2);
        assert_eq!(store.stale_submissions(c.id, cutoff, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn event_rows_are_deduplicated() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let sub = SubmissionId::new();
        let row = MetricFetchLog::new(FetchSource::Webhook, FetchStatus::Success, now)
            .submission(sub)
            .event("evt_42");

        assert!(!store.webhook_event_seen("evt_42").await.unwrap());
        assert!(store.append_fetch_log(&row).await.unwrap());
        assert!(!store.append_fetch_log(&row).await.unwrap());
        assert!(store.webhook_event_seen("evt_42").await.unwrap());

        // rows without an event id are never deduplicated
        let cron = MetricFetchLog::new(FetchSource::Cron, FetchStatus::Success, now);
        assert!(store.append_fetch_log(&cron).await.unwrap());
        assert!(store.append_fetch_log(&cron).await.unwrap());
        assert_eq!(store.all_fetch_logs().await.len(), 3);
    }

    #[tokio::test]
    async fn locked_campaigns_ignore_live_matches() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let open = campaign(now);
        let locked = Campaign {
            locked_at: Some(now),
            ..campaign(now)
        };
        store.insert_campaign(&open).await.unwrap();
        store.insert_campaign(&locked).await.unwrap();
        let a = submission(open.id, "shared", now);
        let b = submission(locked.id, "shared", now);
        store.insert_submission(&a).await.unwrap();
        store.insert_submission(&b).await.unwrap();

        let matched = store.match_live_submissions(&["shared".to_string()]).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, a.id);
    }

    #[tokio::test]
    async fn settlement_applies_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let c = campaign(now);
        store.insert_campaign(&c).await.unwrap();
        let s = submission(c.id, "v1", now);
        store.insert_submission(&s).await.unwrap();

        let before = store.begin_settlement(c.id, now).await.unwrap().unwrap();
        let plan = SettlementPlan {
            campaign_id: c.id,
            settled_at: now,
            pool: dec!(8500),
            transactions: vec![LedgerTransaction {
                id: TransactionId::new(),
                user_id: s.creator_id,
                tx_type: TransactionType::Earning,
                amount: dec!(8500),
                status: TransactionStatus::Completed,
                campaign_id: Some(c.id),
                submission_id: Some(s.id),
                description: "payout".into(),
                created_at: now,
            }],
            final_shares: vec![EarningsUpdate {
                submission_id: s.id,
                contribution_percent: dec!(100),
                earnings: dec!(8500),
            }],
            transition: CampaignTransition::new(
                c.id,
                &before.phase().unwrap(),
                &CampaignPhase::Settled { completed_at: now },
                "settled",
                now,
            ),
        };

        let settled = store.settle_campaign(&plan).await.unwrap();
        assert!(settled.is_settled());
        assert_eq!(settled.remaining_budget, dec!(1500));
        assert_eq!(store.balance(s.creator_id).await.unwrap(), dec!(8500));

        let err = store.settle_campaign(&plan).await.unwrap_err();
        assert!(matches!(err, DbError::AlreadySettled(_)));
        assert_eq!(store.balance(s.creator_id).await.unwrap(), dec!(8500));
        assert_eq!(store.campaign_transactions(c.id).await.unwrap().len(), 1);
        assert!(store.begin_settlement(c.id, now).await.unwrap().is_none());
        assert!(!store.mark_payout_failed(c.id, "late failure").await.unwrap());
    }

    #[tokio::test]
    async fn reconnect_flag_follows_account_owner() {
        let store = MemoryStore::new();
        let user = UserId::new();
        store.link_provider_account("acct_9", user).await.unwrap();

        assert_eq!(store.flag_reconnect("acct_9").await.unwrap(), Some(user));
        assert!(store.needs_reconnect(user).await.unwrap());
        assert_eq!(store.flag_reconnect("acct_unknown").await.unwrap(), None);
    }
}
