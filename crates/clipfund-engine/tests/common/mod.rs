#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use clipfund_db::{MemoryStore, Store};
use clipfund_engine::{Engine, EngineConfig, EngineContext, ManualClock};
use clipfund_ingest::{
    BulkMetrics, IngestError, IngestResult, MetricsProvider, MetricsSnapshot, RefreshTicket,
    UnavailableContent,
};
use clipfund_scoring::thresholds_for_budget;
use clipfund_types::{
    Campaign, CampaignId, CampaignStatus, EngagementCounters, PointsBreakdown, Submission,
    SubmissionId, SubmissionStatus, UserId,
};

/// Provider double: scripted answers per content id, call counters, optional latency
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<HashMap<String, Result<EngagementCounters, IngestError>>>,
    refresh_failures: Mutex<Vec<String>>,
    pub fetch_calls: AtomicUsize,
    pub bulk_calls: AtomicUsize,
    pub refreshed_accounts: Mutex<Vec<String>>,
    latency: Option<StdDuration>,
}

impl MockProvider {
    pub fn with_latency(latency: StdDuration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    pub fn set_metrics(&self, content_id: &str, counters: EngagementCounters) {
        self.script
            .lock()
            .unwrap()
            .insert(content_id.to_string(), Ok(counters));
    }

    pub fn fail(&self, content_id: &str, error: IngestError) {
        self.script
            .lock()
            .unwrap()
            .insert(content_id.to_string(), Err(error));
    }

    pub fn fail_refresh(&self, account_id: &str) {
        self.refresh_failures.lock().unwrap().push(account_id.to_string());
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_fetches(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    fn answer(&self, content_id: &str) -> IngestResult<MetricsSnapshot> {
        let scripted = self.script.lock().unwrap().get(content_id).cloned();
        let counters = scripted.unwrap_or(Ok(EngagementCounters {
            views: 1_000,
            likes: 10,
            ..Default::default()
        }))?;
        Ok(MetricsSnapshot::new(counters, Utc::now()).with_content_id(content_id))
    }
}

#[async_trait]
impl MetricsProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_metrics(&self, content_url: &str) -> IngestResult<MetricsSnapshot> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let id = content_url.rsplit('/').next().unwrap_or(content_url);
        self.answer(id)
    }

    /// Unavailable content is reported as such; transient failures are just absent
    async fn fetch_metrics_bulk(&self, content_ids: &[String]) -> IngestResult<BulkMetrics> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        let mut bulk = BulkMetrics::default();
        for id in content_ids {
            match self.answer(id) {
                Ok(snapshot) => bulk.snapshots.push(snapshot),
                Err(IngestError::ContentUnavailable { reason }) => {
                    bulk.unavailable.push(UnavailableContent {
                        content_id: id.clone(),
                        reason,
                    })
                }
                Err(_) => {}
            }
        }
        Ok(bulk)
    }

    async fn request_refresh(&self, account_id: &str) -> IngestResult<RefreshTicket> {
        self.refreshed_accounts
            .lock()
            .unwrap()
            .push(account_id.to_string());
        if self.refresh_failures.lock().unwrap().iter().any(|a| a == account_id) {
            return Err(IngestError::Provider {
                status: 503,
                message: "refresh queue full".into(),
            });
        }
        Ok(RefreshTicket {
            job_id: Some(format!("job_{}", account_id)),
        })
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: MemoryStore,
    pub clock: ManualClock,
    pub provider: Arc<MockProvider>,
    pub start: DateTime<Utc>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_provider(MockProvider::default())
    }

    pub fn with_provider(provider: MockProvider) -> Self {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let store = MemoryStore::new();
        let provider = Arc::new(provider);
        let ctx = EngineContext::new(
            Arc::new(store.clone()),
            provider.clone(),
            Arc::new(clock.clone()),
            EngineConfig::default(),
        )
        .unwrap();
        Self {
            engine: Engine::new(ctx),
            store,
            clock,
            provider,
            start,
        }
    }

    /// Active 100k campaign, due now, ending in `ends_in`
    pub async fn campaign(&self, ends_in: Duration) -> Campaign {
        let campaign = self.unsaved_campaign(ends_in);
        self.store.insert_campaign(&campaign).await.unwrap();
        campaign
    }

    pub fn unsaved_campaign(&self, ends_in: Duration) -> Campaign {
        let budget = dec!(100000);
        Campaign {
            id: CampaignId::new(),
            artist_id: UserId::new(),
            title: "Night drive".into(),
            status: CampaignStatus::Active,
            total_budget: budget,
            remaining_budget: budget,
            platform_fee_percent: dec!(10),
            safety_reserve_percent: dec!(5),
            total_points: 0,
            start_date: self.start - Duration::days(3),
            end_date: self.start + ends_in,
            locked_at: None,
            metrics_processing_at: None,
            metrics_lease_token: None,
            next_metrics_fetch_at: Some(self.start),
            payout_status: None,
            payout_error: None,
            completed_at: None,
            insurance: thresholds_for_budget(budget),
            created_at: self.start - Duration::days(3),
            updated_at: self.start - Duration::days(3),
        }
    }

    pub async fn submissions(&self, campaign: &Campaign, count: usize) -> Vec<Submission> {
        let mut out = Vec::with_capacity(count);
        for n in 0..count {
            let submission = submission(campaign, n, Some(format!("acc_{}", n % 7)));
            self.store.insert_submission(&submission).await.unwrap();
            out.push(submission);
        }
        out
    }
}

pub fn submission(campaign: &Campaign, n: usize, account: Option<String>) -> Submission {
    let content_id = format!("{}-{:05}", campaign.id.as_uuid(), n);
    Submission {
        id: SubmissionId::new(),
        campaign_id: campaign.id,
        creator_id: UserId::new(),
        status: SubmissionStatus::Approved,
        content_url: format!("https://clips.example.com/v/{}", content_id),
        external_content_id: content_id,
        provider_account_id: account,
        counters: EngagementCounters::default(),
        points: PointsBreakdown::default(),
        contribution_percent: Decimal::ZERO,
        total_earnings: Decimal::ZERO,
        last_checked_at: None,
        rejection_reason: None,
        created_at: campaign.created_at + Duration::seconds(n as i64),
    }
}

pub fn shares(n: u64) -> EngagementCounters {
    EngagementCounters {
        shares: n,
        ..Default::default()
    }
}
