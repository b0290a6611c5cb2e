//! Push-path metrics ingestion
//!
//! Runs after the HTTP handler has already acknowledged the delivery. Every
//! delivery is deduplicated on its event id; a replay is a no-op.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use clipfund_ingest::{IngestError, MetricsSnapshot, WebhookEnvelope, WebhookEvent};
use clipfund_types::{CampaignId, FetchSource, FetchStatus, MetricFetchLog, Submission};

use crate::estimates::EstimateService;
use crate::{EngineContext, EngineResult};

/// What processing a delivery did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    /// The event id was already processed
    pub duplicate: bool,
    pub applied: u32,
    pub skipped: u32,
    /// Content the provider reported private or removed, now REJECTED
    pub rejected: u32,
    pub failed: u32,
    pub campaigns_recomputed: u32,
    pub reconnect_flagged: bool,
}

pub struct WebhookProcessor {
    ctx: EngineContext,
}

impl WebhookProcessor {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn process(&self, envelope: &WebhookEnvelope) -> EngineResult<WebhookReport> {
        let kind = envelope.kind();
        let label = match &kind {
            WebhookEvent::MetricsUpdated { .. } => "metrics_updated",
            WebhookEvent::RefreshCompleted { .. } => "refresh_completed",
            WebhookEvent::SessionExpired { .. } => "session_expired",
            WebhookEvent::Unknown { .. } => "unknown",
        };
        metrics::counter!("clipfund_webhooks_received_total", "event" => label).increment(1);

        if self.ctx.store.webhook_event_seen(&envelope.id).await? {
            debug!(event_id = %envelope.id, "Webhook event already processed");
            return Ok(WebhookReport {
                duplicate: true,
                ..Default::default()
            });
        }

        match kind {
            WebhookEvent::MetricsUpdated { content_ids } => self.apply(&envelope.id, &content_ids).await,
            WebhookEvent::RefreshCompleted {
                account_id,
                job_id,
                content_ids,
            } => {
                debug!(event_id = %envelope.id, ?account_id, ?job_id, "Provider refresh completed");
                self.apply(&envelope.id, &content_ids).await
            }
            WebhookEvent::SessionExpired { account_id } => {
                self.session_expired(&envelope.id, &account_id).await
            }
            WebhookEvent::Unknown { event } => {
                self.log_event(&envelope.id, FetchStatus::Skipped, format!("unhandled event {}", event))
                    .await?;
                Ok(WebhookReport {
                    skipped: 1,
                    ..Default::default()
                })
            }
        }
    }

    async fn apply(&self, event_id: &str, content_ids: &[String]) -> EngineResult<WebhookReport> {
        let mut report = WebhookReport::default();
        let matched = self.ctx.store.match_live_submissions(content_ids).await?;
        if matched.is_empty() {
            self.log_event(event_id, FetchStatus::Skipped, "no live submission matches".to_string())
                .await?;
            report.skipped = 1;
            return Ok(report);
        }

        // one content id may be entered in several campaigns
        let mut by_content: HashMap<&str, Vec<&Submission>> = HashMap::new();
        let mut ids: Vec<String> = Vec::new();
        for submission in &matched {
            let id = submission.external_content_id.as_str();
            if !by_content.contains_key(id) {
                ids.push(id.to_string());
            }
            by_content.entry(id).or_default().push(submission);
        }

        let mut touched: Vec<CampaignId> = Vec::new();
        for chunk in ids.chunks(self.ctx.config.scheduler.webhook_chunk_size) {
            let bulk = match self.ctx.provider.fetch_metrics_bulk(chunk).await {
                Ok(bulk) => bulk,
                Err(e) => {
                    warn!(event_id, error = %e, "Bulk metrics fetch failed");
                    for id in chunk {
                        for submission in by_content.get(id.as_str()).into_iter().flatten() {
                            let log = self.submission_log(event_id, submission, FetchStatus::Failed)
                                .error(e.to_string());
                            self.ctx.store.append_fetch_log(&log).await?;
                            report.failed += 1;
                        }
                    }
                    continue;
                }
            };
            let unavailable: HashMap<&str, &str> = bulk
                .unavailable
                .iter()
                .map(|u| (u.content_id.as_str(), u.reason.as_str()))
                .collect();
            let by_id: HashMap<&str, &MetricsSnapshot> = bulk
                .snapshots
                .iter()
                .filter_map(|s| s.content_id.as_deref().map(|id| (id, s)))
                .collect();

            for content_id in chunk {
                let Some(submissions) = by_content.get(content_id.as_str()) else {
                    continue;
                };
                let snapshot = by_id.get(content_id.as_str());
                let gone = unavailable.get(content_id.as_str());
                for submission in submissions {
                    if let (None, Some(reason)) = (snapshot, gone) {
                        let reason = IngestError::unavailable(*reason).to_string();
                        warn!(submission_id = %submission.id, %reason, "Content unavailable, rejecting submission");
                        self.ctx.store.reject_submission(submission.id, &reason).await?;
                        let log = self
                            .submission_log(event_id, submission, FetchStatus::Failed)
                            .error(reason);
                        self.ctx.store.append_fetch_log(&log).await?;
                        if !touched.contains(&submission.campaign_id) {
                            touched.push(submission.campaign_id);
                        }
                        report.rejected += 1;
                        continue;
                    }
                    match snapshot {
                        Some(snapshot) => {
                            let counters = snapshot.counters();
                            let points = self.ctx.points.score_counters(&counters);
                            self.ctx
                                .store
                                .apply_metrics(submission.id, counters, points, self.ctx.clock.now())
                                .await?;
                            let log = self
                                .submission_log(event_id, submission, FetchStatus::Success)
                                .snapshot(snapshot.to_log_value());
                            self.ctx.store.append_fetch_log(&log).await?;
                            if !touched.contains(&submission.campaign_id) {
                                touched.push(submission.campaign_id);
                            }
                            report.applied += 1;
                        }
                        None => {
                            let log = self
                                .submission_log(event_id, submission, FetchStatus::Skipped)
                                .error("not returned by provider");
                            self.ctx.store.append_fetch_log(&log).await?;
                            report.skipped += 1;
                        }
                    }
                }
            }
        }

        // once per campaign, not per submission
        let estimates = EstimateService::new(self.ctx.clone());
        for campaign_id in touched {
            match estimates.recompute(campaign_id).await {
                Ok(_) => report.campaigns_recomputed += 1,
                Err(e) if e.is_conflict() => {
                    debug!(campaign_id = %campaign_id, "Campaign settled meanwhile, estimates left alone")
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            event_id,
            applied = report.applied,
            skipped = report.skipped,
            rejected = report.rejected,
            failed = report.failed,
            campaigns = report.campaigns_recomputed,
            "Webhook applied"
        );
        Ok(report)
    }

    async fn session_expired(&self, event_id: &str, account_id: &str) -> EngineResult<WebhookReport> {
        let owner = self.ctx.store.flag_reconnect(account_id).await?;
        match owner {
            Some(user_id) => {
                info!(user_id = %user_id, account_id, "Provider session expired, reconnect required");
                self.log_event(event_id, FetchStatus::Success, format!("reconnect requested for {}", account_id))
                    .await?;
            }
            None => {
                warn!(account_id, "Session expiry for an unknown account");
                self.log_event(event_id, FetchStatus::Skipped, format!("unknown account {}", account_id))
                    .await?;
            }
        }
        Ok(WebhookReport {
            reconnect_flagged: owner.is_some(),
            skipped: u32::from(owner.is_none()),
            ..Default::default()
        })
    }

    fn submission_log(&self, event_id: &str, submission: &Submission, status: FetchStatus) -> MetricFetchLog {
        MetricFetchLog::new(FetchSource::Webhook, status, self.ctx.clock.now())
            .campaign(submission.campaign_id)
            .submission(submission.id)
            .event(event_id)
    }

    /// Event-level audit row, keyed on the event id alone
    async fn log_event(&self, event_id: &str, status: FetchStatus, message: String) -> EngineResult<()> {
        let log = MetricFetchLog::new(FetchSource::Webhook, status, self.ctx.clock.now())
            .event(event_id)
            .error(message);
        self.ctx.store.append_fetch_log(&log).await?;
        Ok(())
    }
}
