//! Campaign settlement
//!
//! `finish` freezes the campaign, runs the final redistribution and hands the
//! store one [`SettlementPlan`]: ledger rows, balance credits, final shares,
//! the payout flag and the phase transition are applied together or not at
//! all. A COMPLETED payout is never written twice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use clipfund_db::SettlementPlan;
use clipfund_scoring::RedistributionOutcome;
use clipfund_types::{
    Campaign, CampaignId, CampaignPhase, CampaignTransition, FetchSource, FetchStatus,
    LedgerTransaction, MetricFetchLog, PayoutStatus, TransactionId, TransactionStatus,
    TransactionType,
};

use crate::estimates::{earnings_updates, participants};
use crate::{EngineContext, EngineError, EngineResult};

/// What a successful settlement paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub campaign_id: CampaignId,
    pub pool: Decimal,
    pub paid: Decimal,
    pub refund: Decimal,
    pub transactions: usize,
    pub insurance_triggered: bool,
    pub outcome: RedistributionOutcome,
}

/// Aggregate of a distribute cron run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: u32,
    pub failed: u32,
}

pub struct Settlement {
    ctx: EngineContext,
}

impl Settlement {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Settle one campaign. On failure the payout is marked FAILED (never over
    /// a COMPLETED one) so an operator can retry.
    pub async fn finish(&self, campaign_id: CampaignId) -> EngineResult<SettlementReport> {
        let campaign = self
            .ctx
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or(EngineError::CampaignNotFound(campaign_id))?;
        if campaign.is_settled() {
            return Err(EngineError::AlreadySettled(campaign_id));
        }
        let phase = campaign.phase()?;
        if !phase.accepts_settlement() {
            return Err(EngineError::NotSettleable {
                campaign_id,
                phase: phase.label().to_string(),
            });
        }

        match self.settle(campaign, phase).await {
            Ok(report) => {
                let outcome = if report.insurance_triggered { "insurance" } else { "paid" };
                metrics::counter!("clipfund_settlements_total", "outcome" => outcome).increment(1);
                Ok(report)
            }
            Err(e) if e.is_conflict() => Err(e),
            Err(e) => {
                error!(campaign_id = %campaign_id, error = %e, "Settlement failed");
                metrics::counter!("clipfund_settlements_total", "outcome" => "failed").increment(1);
                self.record_failure(campaign_id, &e).await;
                Err(e)
            }
        }
    }

    /// Settle every locked, ended, unpaid campaign. One failure never blocks
    /// the rest of the batch.
    pub async fn process_ended_campaigns(&self) -> EngineResult<BatchReport> {
        let now = self.ctx.clock.now();
        let ended = self.ctx.store.ended_unsettled_campaigns(now).await?;

        let mut report = BatchReport::default();
        for campaign in ended {
            match self.finish(campaign.id).await {
                Ok(_) => report.processed += 1,
                Err(e) => {
                    warn!(campaign_id = %campaign.id, error = %e, "Campaign not settled");
                    report.failed += 1;
                }
            }
        }
        info!(processed = report.processed, failed = report.failed, "Distribute run finished");
        Ok(report)
    }

    async fn settle(&self, campaign: Campaign, from: CampaignPhase) -> EngineResult<SettlementReport> {
        let now = self.ctx.clock.now();
        let mut campaign = self
            .ctx
            .store
            .begin_settlement(campaign.id, now)
            .await?
            .ok_or(EngineError::AlreadySettled(campaign.id))?;

        let submissions = self.ctx.store.approved_submissions(campaign.id).await?;
        let total_points = self.ctx.points.campaign_total(&submissions);
        self.ctx
            .store
            .set_campaign_total_points(campaign.id, total_points)
            .await?;
        campaign.total_points = total_points;

        let participants = participants(&submissions);
        let outcome = self.ctx.redistribution.redistribute(&campaign, &participants)?;

        let locked_at = campaign.locked_at.unwrap_or(now);
        let frozen = CampaignPhase::Frozen {
            locked_at,
            payout: Some(PayoutStatus::Pending),
        };
        if !matches!(from, CampaignPhase::Frozen { .. }) {
            self.ctx
                .store
                .record_transition(&CampaignTransition::new(
                    campaign.id,
                    &from,
                    &frozen,
                    "locked for settlement",
                    now,
                ))
                .await?;
        }

        let plan = SettlementPlan {
            campaign_id: campaign.id,
            settled_at: now,
            pool: outcome.pool(),
            transactions: ledger_rows(&campaign, &outcome, now),
            final_shares: earnings_updates(&outcome, &participants),
            transition: CampaignTransition::new(
                campaign.id,
                &frozen,
                &CampaignPhase::Settled { completed_at: now },
                settlement_reason(&outcome),
                now,
            ),
        };
        self.ctx.store.settle_campaign(&plan).await?;

        let report = SettlementReport {
            campaign_id: campaign.id,
            pool: outcome.pool(),
            paid: outcome.total_paid(),
            refund: outcome.refund(),
            transactions: plan.transactions.len(),
            insurance_triggered: outcome.is_insurance_triggered(),
            outcome,
        };

        let status = if report.insurance_triggered {
            FetchStatus::InsuranceTriggered
        } else {
            FetchStatus::Success
        };
        let log = MetricFetchLog::new(FetchSource::Cron, status, now)
            .campaign(campaign.id)
            .snapshot(json!({
                "pool": report.pool,
                "paid": report.paid,
                "refund": report.refund,
                "transactions": report.transactions,
                "outcome": report.outcome,
            }));
        if let Err(e) = self.ctx.store.append_fetch_log(&log).await {
            // settled already; the audit row is not worth failing over
            warn!(campaign_id = %campaign.id, error = %e, "Failed to write settlement audit row");
        }

        info!(
            campaign_id = %campaign.id,
            pool = %report.pool,
            paid = %report.paid,
            refund = %report.refund,
            insurance = report.insurance_triggered,
            "Campaign settled"
        );
        Ok(report)
    }

    async fn record_failure(&self, campaign_id: CampaignId, cause: &EngineError) {
        if let Err(e) = self
            .ctx
            .store
            .mark_payout_failed(campaign_id, &cause.to_string())
            .await
        {
            warn!(campaign_id = %campaign_id, error = %e, "Failed to mark payout FAILED");
        }
        let log = MetricFetchLog::new(FetchSource::Cron, FetchStatus::Failed, self.ctx.clock.now())
            .campaign(campaign_id)
            .error(cause.to_string());
        if let Err(e) = self.ctx.store.append_fetch_log(&log).await {
            warn!(campaign_id = %campaign_id, error = %e, "Failed to write audit row");
        }
    }
}

fn settlement_reason(outcome: &RedistributionOutcome) -> &'static str {
    match outcome {
        RedistributionOutcome::InsuranceTriggered { .. } => "insurance refund",
        RedistributionOutcome::Unallocated { .. } => "no participants, pool refunded",
        RedistributionOutcome::Distributed { .. } => "pool distributed",
    }
}

/// EARNING per paid share, plus one ADJUSTMENT returning any refund to the artist
fn ledger_rows(
    campaign: &Campaign,
    outcome: &RedistributionOutcome,
    at: DateTime<Utc>,
) -> Vec<LedgerTransaction> {
    let mut rows: Vec<LedgerTransaction> = outcome
        .shares()
        .iter()
        .filter(|share| share.amount > Decimal::ZERO)
        .map(|share| LedgerTransaction {
            id: TransactionId::new(),
            user_id: share.creator_id,
            tx_type: TransactionType::Earning,
            amount: share.amount,
            status: TransactionStatus::Completed,
            campaign_id: Some(campaign.id),
            submission_id: Some(share.submission_id),
            description: format!("Earnings from campaign \"{}\"", campaign.title),
            created_at: at,
        })
        .collect();

    let refund = outcome.refund();
    if refund > Decimal::ZERO {
        rows.push(LedgerTransaction {
            id: TransactionId::new(),
            user_id: campaign.artist_id,
            tx_type: TransactionType::Adjustment,
            amount: refund,
            status: TransactionStatus::Completed,
            campaign_id: Some(campaign.id),
            submission_id: None,
            description: format!(
                "Refund for campaign \"{}\": {}",
                campaign.title,
                settlement_reason(outcome)
            ),
            created_at: at,
        });
    }
    rows
}
