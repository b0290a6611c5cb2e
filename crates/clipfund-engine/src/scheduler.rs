//! Metrics refresh scheduler
//!
//! Each tick leases up to `max_campaigns_per_tick` due campaigns one after
//! another and, for each, refreshes at most `max_submissions_per_tick` stale
//! submissions in parallel sub-batches. A campaign larger than the per-tick cap
//! keeps its due time and is resumed by the next tick; the cycle only advances
//! once nothing stale is left.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use clipfund_db::NextFetch;
use clipfund_types::{Campaign, CampaignId, FetchSource, FetchStatus, MetricFetchLog, Submission};

use crate::estimates::EstimateService;
use crate::lease::{Lease, LeaseManager};
use crate::{EngineContext, EngineError, EngineResult};

/// Outcome of one campaign within a tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignRefresh {
    pub campaign_id: CampaignId,
    pub refreshed: u32,
    /// Transient failures; left stale for the next tick
    pub failed: u32,
    /// Permanently unavailable content, now REJECTED
    pub rejected: u32,
    /// Stale submissions still waiting after this tick
    pub remaining: u64,
    pub cycle_complete: bool,
    pub next_fetch_at: Option<DateTime<Utc>>,
    /// The lease expired mid-run and another invocation took over
    pub lease_lost: bool,
}

/// Outcome of a whole tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub campaigns: Vec<CampaignRefresh>,
    /// Due campaigns whose lease was held elsewhere
    pub skipped: u32,
    /// Campaigns whose refresh aborted with an error
    pub errored: u32,
}

impl TickReport {
    pub fn refreshed(&self) -> u32 {
        self.campaigns.iter().map(|c| c.refreshed).sum()
    }
}

#[derive(Default)]
struct BatchCounts {
    refreshed: u32,
    failed: u32,
    rejected: u32,
}

pub struct MetricsScheduler {
    ctx: EngineContext,
    leases: LeaseManager,
}

impl MetricsScheduler {
    pub fn new(ctx: EngineContext) -> Self {
        let leases = LeaseManager::new(
            ctx.store.clone(),
            ctx.clock.clone(),
            ctx.config.scheduler.lease_ttl(),
        );
        Self { ctx, leases }
    }

    /// Run one scheduler tick
    pub async fn tick(&self) -> EngineResult<TickReport> {
        let config = &self.ctx.config.scheduler;
        let now = self.ctx.clock.now();
        let due = self
            .ctx
            .store
            .due_campaigns(now, self.leases.stale_before(now), config.max_campaigns_per_tick)
            .await?;
        metrics::counter!("clipfund_ticks_total").increment(1);

        let mut report = TickReport::default();
        for campaign in due {
            let Some(lease) = self.leases.acquire(campaign.id).await? else {
                report.skipped += 1;
                continue;
            };

            match self.refresh_campaign(&campaign, &lease).await {
                Ok(refresh) => report.campaigns.push(refresh),
                Err(e) => {
                    error!(campaign_id = %campaign.id, error = %e, "Metrics refresh aborted");
                    report.errored += 1;
                    self.abort(&campaign, &lease, &e).await;
                }
            }
        }

        info!(
            campaigns = report.campaigns.len(),
            skipped = report.skipped,
            errored = report.errored,
            refreshed = report.refreshed(),
            "Metrics tick finished"
        );
        Ok(report)
    }

    /// Best-effort cleanup after a fatal error: free the lease without moving
    /// the schedule and leave an audit row. Only reached while the lease is
    /// still held.
    async fn abort(&self, campaign: &Campaign, lease: &Lease, cause: &EngineError) {
        if let Err(e) = self.leases.release(lease, NextFetch::Keep).await {
            warn!(campaign_id = %campaign.id, error = %e, "Failed to release metrics lease");
        }
        let log = MetricFetchLog::new(
            FetchSource::PerCampaignCron,
            FetchStatus::Failed,
            self.ctx.clock.now(),
        )
        .campaign(campaign.id)
        .error(cause.to_string());
        if let Err(e) = self.ctx.store.append_fetch_log(&log).await {
            warn!(campaign_id = %campaign.id, error = %e, "Failed to write audit row");
        }
    }

    /// Submissions checked before this instant are stale for the current cycle
    fn staleness_cutoff(&self, campaign: &Campaign) -> DateTime<Utc> {
        match campaign.next_metrics_fetch_at {
            Some(due) => due - self.ctx.config.scheduler.staleness_window(),
            None => DateTime::<Utc>::default(),
        }
    }

    /// Where the schedule goes once a cycle has no stale submissions left
    pub fn next_cycle_start(&self, campaign: &Campaign, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let config = &self.ctx.config.scheduler;
        let next = campaign.next_metrics_fetch_at.unwrap_or(now) + config.cycle();
        if next >= campaign.end_date - config.end_buffer() {
            None
        } else {
            Some(next)
        }
    }

    async fn refresh_campaign(&self, campaign: &Campaign, lease: &Lease) -> EngineResult<CampaignRefresh> {
        let config = &self.ctx.config.scheduler;
        let cutoff = self.staleness_cutoff(campaign);
        let stale = self
            .ctx
            .store
            .stale_submissions(campaign.id, cutoff, config.max_submissions_per_tick)
            .await?;
        debug!(campaign_id = %campaign.id, stale = stale.len(), %cutoff, "Refreshing campaign");

        let mut counts = BatchCounts::default();
        for chunk in stale.chunks(config.batch_size) {
            self.refresh_batch(chunk, &mut counts).await?;
        }

        if counts.refreshed > 0 || counts.rejected > 0 {
            EstimateService::new(self.ctx.clone())
                .recompute(campaign.id)
                .await?;
        }

        let remaining = self
            .ctx
            .store
            .count_stale_submissions(campaign.id, cutoff)
            .await?;
        let cycle_complete = remaining == 0;
        let (next_fetch, next_fetch_at) = if cycle_complete {
            let next = self.next_cycle_start(campaign, self.ctx.clock.now());
            (NextFetch::Set(next), next)
        } else {
            (NextFetch::Keep, campaign.next_metrics_fetch_at)
        };

        let released = self.leases.release(lease, next_fetch).await?;
        let refresh = CampaignRefresh {
            campaign_id: campaign.id,
            refreshed: counts.refreshed,
            failed: counts.failed,
            rejected: counts.rejected,
            remaining,
            cycle_complete,
            next_fetch_at: if released { next_fetch_at } else { None },
            lease_lost: !released,
        };
        // the lease is gone by now, so this must not fail the refresh into `abort`
        if let Err(e) = self.record(&refresh).await {
            warn!(campaign_id = %campaign.id, error = %e, "Failed to write refresh audit row");
        }

        info!(
            campaign_id = %campaign.id,
            refreshed = refresh.refreshed,
            failed = refresh.failed,
            rejected = refresh.rejected,
            remaining,
            cycle_complete,
            "Campaign refresh finished"
        );
        Ok(refresh)
    }

    /// One parallel sub-batch; a failing item never aborts its siblings
    async fn refresh_batch(&self, batch: &[Submission], counts: &mut BatchCounts) -> EngineResult<()> {
        let provider = &self.ctx.provider;
        let results = join_all(
            batch
                .iter()
                .map(|s| async move { (s, provider.fetch_metrics(&s.content_url).await) }),
        )
        .await;

        for (submission, result) in results {
            match result {
                Ok(snapshot) => {
                    let counters = snapshot.counters();
                    let points = self.ctx.points.score_counters(&counters);
                    self.ctx
                        .store
                        .apply_metrics(submission.id, counters, points, self.ctx.clock.now())
                        .await?;
                    counts.refreshed += 1;
                    metrics::counter!("clipfund_submissions_refreshed_total", "result" => "ok")
                        .increment(1);
                }
                Err(e) if e.is_permanent() => {
                    warn!(submission_id = %submission.id, reason = %e, "Content unavailable, rejecting submission");
                    self.ctx
                        .store
                        .reject_submission(submission.id, &e.to_string())
                        .await?;
                    let log = MetricFetchLog::new(
                        FetchSource::PerCampaignCron,
                        FetchStatus::Failed,
                        self.ctx.clock.now(),
                    )
                    .campaign(submission.campaign_id)
                    .submission(submission.id)
                    .error(e.to_string());
                    self.ctx.store.append_fetch_log(&log).await?;
                    counts.rejected += 1;
                    metrics::counter!("clipfund_submissions_refreshed_total", "result" => "rejected")
                        .increment(1);
                }
                Err(e) => {
                    warn!(submission_id = %submission.id, error = %e, "Metrics fetch failed, will retry next tick");
                    counts.failed += 1;
                    metrics::counter!("clipfund_submissions_refreshed_total", "result" => "failed")
                        .increment(1);
                }
            }
        }
        Ok(())
    }

    async fn record(&self, refresh: &CampaignRefresh) -> EngineResult<()> {
        let status = if refresh.failed == 0 {
            FetchStatus::Success
        } else if refresh.refreshed > 0 {
            FetchStatus::Partial
        } else {
            FetchStatus::Failed
        };
        let mut log = MetricFetchLog::new(FetchSource::PerCampaignCron, status, self.ctx.clock.now())
            .campaign(refresh.campaign_id)
            .snapshot(json!({
                "refreshed": refresh.refreshed,
                "failed": refresh.failed,
                "rejected": refresh.rejected,
                "remaining": refresh.remaining,
                "cycle_complete": refresh.cycle_complete,
                "next_fetch_at": refresh.next_fetch_at,
                "lease_lost": refresh.lease_lost,
            }));
        if refresh.failed > 0 {
            log = log.error(format!("{} submissions failed to refresh", refresh.failed));
        }
        self.ctx.store.append_fetch_log(&log).await?;
        Ok(())
    }
}
