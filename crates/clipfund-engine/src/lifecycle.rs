//! Pre-end lock cron
//!
//! Runs once a day shortly before local midnight. Every active campaign that
//! ends before that midnight is frozen, and the provider is asked to re-scrape
//! each creator account involved so the final numbers arrive by webhook before
//! settlement.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use clipfund_types::{
    Campaign, CampaignPhase, CampaignTransition, FetchSource, FetchStatus, MetricFetchLog,
};

use crate::{EngineContext, EngineError, EngineResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreLockReport {
    pub cutoff: Option<DateTime<Utc>>,
    pub locked: u32,
    pub refresh_requested: u32,
    pub refresh_failed: u32,
    /// Campaigns skipped because of an error; the rest still ran
    pub errored: u32,
}

/// First instant of the next local day, in UTC
pub fn next_local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> EngineResult<DateTime<Utc>> {
    now.with_timezone(&offset)
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(offset).single())
        .map(|midnight| midnight.with_timezone(&Utc))
        .ok_or_else(|| EngineError::Config(format!("no local midnight after {}", now)))
}

pub struct PreLockCron {
    ctx: EngineContext,
}

impl PreLockCron {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> EngineResult<PreLockReport> {
        let now = self.ctx.clock.now();
        let cutoff = next_local_midnight(now, self.ctx.config.scheduler.local_offset()?)?;
        let ending = self.ctx.store.campaigns_ending_before(cutoff).await?;

        let mut report = PreLockReport {
            cutoff: Some(cutoff),
            ..Default::default()
        };
        for campaign in ending {
            if let Err(e) = self.lock_and_refresh(&campaign, now, &mut report).await {
                warn!(campaign_id = %campaign.id, error = %e, "Pre-end lock failed");
                report.errored += 1;
            }
        }

        info!(
            %cutoff,
            locked = report.locked,
            refresh_requested = report.refresh_requested,
            refresh_failed = report.refresh_failed,
            errored = report.errored,
            "Pre-end lock run finished"
        );
        Ok(report)
    }

    async fn lock_and_refresh(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
        report: &mut PreLockReport,
    ) -> EngineResult<()> {
        let from = campaign.phase()?;
        if !self.ctx.store.lock_campaign(campaign.id, now).await? {
            return Ok(());
        }
        report.locked += 1;
        self.ctx
            .store
            .record_transition(&CampaignTransition::new(
                campaign.id,
                &from,
                &CampaignPhase::Frozen {
                    locked_at: now,
                    payout: None,
                },
                "pre-end lock",
                now,
            ))
            .await?;

        let accounts: BTreeSet<String> = self
            .ctx
            .store
            .approved_submissions(campaign.id)
            .await?
            .into_iter()
            .filter_map(|s| s.provider_account_id)
            .filter(|a| !a.is_empty())
            .collect();

        // each account is requested and logged on its own
        for account_id in accounts {
            let log = match self.ctx.provider.request_refresh(&account_id).await {
                Ok(ticket) => {
                    report.refresh_requested += 1;
                    MetricFetchLog::new(FetchSource::OnDemand, FetchStatus::Success, self.ctx.clock.now())
                        .campaign(campaign.id)
                        .snapshot(json!({ "account_id": account_id, "job_id": ticket.job_id }))
                }
                Err(e) => {
                    warn!(campaign_id = %campaign.id, account_id = %account_id, error = %e, "On-demand refresh failed");
                    report.refresh_failed += 1;
                    MetricFetchLog::new(FetchSource::OnDemand, FetchStatus::Failed, self.ctx.clock.now())
                        .campaign(campaign.id)
                        .snapshot(json!({ "account_id": account_id }))
                        .error(e.to_string())
                }
            };
            self.ctx.store.append_fetch_log(&log).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn midnight_respects_the_local_offset() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 22, 0, 0).unwrap();

        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(
            next_local_midnight(now, utc).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap()
        );

        // 22:00 UTC is already 01:00 on the 11th in UTC+3
        let plus3 = FixedOffset::east_opt(3 * 3600).unwrap();
        assert_eq!(
            next_local_midnight(now, plus3).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 11, 21, 0, 0).unwrap()
        );

        let minus5 = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(
            next_local_midnight(now, minus5).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 11, 5, 0, 0).unwrap()
        );
    }
}
