//! Campaign totals and live earnings estimates
//!
//! Runs the same redistribution as settlement over the current snapshot and
//! writes only `contribution_percent` / `total_earnings` on submissions. The
//! ledger and wallet balances are never touched here.

use serde::Serialize;
use tracing::debug;

use clipfund_db::EarningsUpdate;
use clipfund_scoring::{Participant, RedistributionOutcome};
use clipfund_types::{CampaignId, Submission};

use crate::{EngineContext, EngineError, EngineResult};

/// What a recompute produced
#[derive(Debug, Clone, Serialize)]
pub struct RecomputeReport {
    pub campaign_id: CampaignId,
    pub total_points: i64,
    pub outcome: RedistributionOutcome,
}

pub(crate) fn participants(submissions: &[Submission]) -> Vec<Participant> {
    submissions
        .iter()
        .filter(|s| s.is_approved())
        .map(|s| Participant {
            submission_id: s.id,
            creator_id: s.creator_id,
            points: s.points.total_points,
            views: s.counters.views,
        })
        .collect()
}

pub(crate) fn earnings_updates(
    outcome: &RedistributionOutcome,
    participants: &[Participant],
) -> Vec<EarningsUpdate> {
    outcome
        .estimates(participants)
        .into_iter()
        .map(|e| EarningsUpdate {
            submission_id: e.submission_id,
            contribution_percent: e.contribution_percent,
            earnings: e.earnings,
        })
        .collect()
}

pub struct EstimateService {
    ctx: EngineContext,
}

impl EstimateService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Store the APPROVED points sum as the campaign total
    pub async fn recompute_totals(&self, campaign_id: CampaignId) -> EngineResult<i64> {
        let submissions = self.ctx.store.approved_submissions(campaign_id).await?;
        let total = self.ctx.points.campaign_total(&submissions);
        self.ctx
            .store
            .set_campaign_total_points(campaign_id, total)
            .await?;
        Ok(total)
    }

    /// Totals plus live estimates. Safe to call any number of times.
    pub async fn recompute(&self, campaign_id: CampaignId) -> EngineResult<RecomputeReport> {
        let mut campaign = self
            .ctx
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or(EngineError::CampaignNotFound(campaign_id))?;
        if campaign.is_settled() {
            return Err(EngineError::AlreadySettled(campaign_id));
        }

        let submissions = self.ctx.store.approved_submissions(campaign_id).await?;
        let total_points = self.ctx.points.campaign_total(&submissions);
        self.ctx
            .store
            .set_campaign_total_points(campaign_id, total_points)
            .await?;
        campaign.total_points = total_points;

        let participants = participants(&submissions);
        let outcome = self.ctx.redistribution.redistribute(&campaign, &participants)?;
        self.ctx
            .store
            .write_estimates(&earnings_updates(&outcome, &participants))
            .await?;

        debug!(
            campaign_id = %campaign_id,
            total_points,
            participants = participants.len(),
            insurance = outcome.is_insurance_triggered(),
            "Live estimates recomputed"
        );
        Ok(RecomputeReport {
            campaign_id,
            total_points,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{active_campaign, approved_submission, context};
    use clipfund_db::Store;
    use clipfund_types::{EngagementCounters, PointsBreakdown};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn recompute_is_idempotent_and_leaves_ledger_alone() {
        let (ctx, store, _clock, now) = context();
        let campaign = active_campaign(now);
        store.insert_campaign(&campaign).await.unwrap();

        let mut ids = Vec::new();
        for (i, points) in [100i64, 50, 50].into_iter().enumerate() {
            let mut s = approved_submission(&campaign, i);
            s.points = PointsBreakdown {
                total_points: points,
                share_points: points,
                ..Default::default()
            };
            s.counters = EngagementCounters {
                views: 1_000_000,
                ..Default::default()
            };
            ids.push(s.id);
            store.insert_submission(&s).await.unwrap();
        }

        let service = EstimateService::new(ctx);
        let first = service.recompute(campaign.id).await.unwrap();
        let second = service.recompute(campaign.id).await.unwrap();
        assert_eq!(first.total_points, 200);
        assert_eq!(first.outcome, second.outcome);

        let top = store.get_submission(ids[0]).await.unwrap().unwrap();
        assert_eq!(top.total_earnings, dec!(34000));
        assert_eq!(top.contribution_percent, dec!(40));

        let stored = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.total_points, 200);
        assert!(store.campaign_transactions(campaign.id).await.unwrap().is_empty());
        assert_eq!(store.balance(top.creator_id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn unknown_campaign_is_reported() {
        let (ctx, _store, _clock, _now) = context();
        let err = EstimateService::new(ctx)
            .recompute(CampaignId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CampaignNotFound(_)));
    }
}
