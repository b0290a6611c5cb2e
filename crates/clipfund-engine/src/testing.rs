//! Fixtures shared by the unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use clipfund_db::MemoryStore;
use clipfund_ingest::{
    BulkMetrics, IngestError, IngestResult, MetricsProvider, MetricsSnapshot, RefreshTicket,
};
use clipfund_scoring::thresholds_for_budget;
use clipfund_types::{
    Campaign, CampaignId, CampaignStatus, EngagementCounters, PointsBreakdown, Submission,
    SubmissionId, SubmissionStatus, UserId,
};

use crate::{EngineConfig, EngineContext, ManualClock};

pub(crate) fn clock_at() -> (ManualClock, DateTime<Utc>) {
    let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
    (ManualClock::new(now), now)
}

/// 100k budget, 10% fee, 5% reserve, due now, ending in two weeks
pub(crate) fn active_campaign(now: DateTime<Utc>) -> Campaign {
    let budget = dec!(100000);
    Campaign {
        id: CampaignId::new(),
        artist_id: UserId::new(),
        title: "Summer single".into(),
        status: CampaignStatus::Active,
        total_budget: budget,
        remaining_budget: budget,
        platform_fee_percent: dec!(10),
        safety_reserve_percent: dec!(5),
        total_points: 0,
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(14),
        locked_at: None,
        metrics_processing_at: None,
        metrics_lease_token: None,
        next_metrics_fetch_at: Some(now),
        payout_status: None,
        payout_error: None,
        completed_at: None,
        insurance: thresholds_for_budget(budget),
        created_at: now - Duration::days(1),
        updated_at: now - Duration::days(1),
    }
}

pub(crate) fn approved_submission(campaign: &Campaign, n: usize) -> Submission {
    Submission {
        id: SubmissionId::new(),
        campaign_id: campaign.id,
        creator_id: UserId::new(),
        status: SubmissionStatus::Approved,
        content_url: format!("https://clips.example.com/v/{}-{}", campaign.id.as_uuid(), n),
        external_content_id: format!("{}-{}", campaign.id.as_uuid(), n),
        provider_account_id: Some(format!("acc_{}", n)),
        counters: EngagementCounters::default(),
        points: PointsBreakdown::default(),
        contribution_percent: Decimal::ZERO,
        total_earnings: Decimal::ZERO,
        last_checked_at: None,
        rejection_reason: None,
        created_at: campaign.created_at + Duration::seconds(n as i64),
    }
}

/// Provider answering from a script keyed by content id (the URL's last segment)
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    metrics: Mutex<HashMap<String, Result<EngagementCounters, IngestError>>>,
    fetch_calls: AtomicUsize,
    bulk_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn set_metrics(&self, content_id: &str, counters: EngagementCounters) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.insert(content_id.to_string(), Ok(counters));
        }
    }

    pub(crate) fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, content_id: &str) -> IngestResult<MetricsSnapshot> {
        let scripted = self
            .metrics
            .lock()
            .ok()
            .and_then(|m| m.get(content_id).cloned())
            .unwrap_or(Ok(EngagementCounters {
                views: 1_000,
                ..Default::default()
            }));
        scripted.map(|c| MetricsSnapshot::new(c, Utc::now()).with_content_id(content_id))
    }
}

#[async_trait]
impl MetricsProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_metrics(&self, content_url: &str) -> IngestResult<MetricsSnapshot> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let id = content_url.rsplit('/').next().unwrap_or(content_url);
        self.lookup(id)
    }

    async fn fetch_metrics_bulk(&self, content_ids: &[String]) -> IngestResult<BulkMetrics> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        let snapshots: Vec<MetricsSnapshot> =
            content_ids.iter().filter_map(|id| self.lookup(id).ok()).collect();
        Ok(snapshots.into())
    }

    async fn request_refresh(&self, account_id: &str) -> IngestResult<RefreshTicket> {
        Ok(RefreshTicket {
            job_id: Some(format!("job_{}", account_id)),
        })
    }
}

pub(crate) fn context_with(
    provider: Arc<ScriptedProvider>,
) -> (EngineContext, MemoryStore, ManualClock, DateTime<Utc>) {
    let (clock, now) = clock_at();
    let store = MemoryStore::new();
    let ctx = EngineContext::new(
        Arc::new(store.clone()),
        provider,
        Arc::new(clock.clone()),
        EngineConfig::default(),
    )
    .unwrap();
    (ctx, store, clock, now)
}

pub(crate) fn context() -> (EngineContext, MemoryStore, ManualClock, DateTime<Utc>) {
    context_with(Arc::new(ScriptedProvider::default()))
}
