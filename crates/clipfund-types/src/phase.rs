//! Explicit campaign lifecycle phase
//!
//! The store keeps the lifecycle spread across nullable timestamps
//! (`locked_at`, `metrics_processing_at`, `completed_at`) plus two status
//! columns. [`CampaignPhase`] folds those fields into one tagged enum so the
//! engine matches on a phase instead of re-deriving it from field combinations,
//! and rejects combinations that no valid history could have produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Campaign, CampaignId, CampaignStatus, LeaseToken, PayoutStatus, TransitionId, TypesError};

/// Where a campaign is in its life
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CampaignPhase {
    /// Awaiting admin approval
    Draft,
    /// Live, collecting submissions, no refresh in flight
    Collecting { next_fetch_at: Option<DateTime<Utc>> },
    /// Live with a metrics lease outstanding
    Refreshing {
        since: DateTime<Utc>,
        token: Option<LeaseToken>,
        next_fetch_at: Option<DateTime<Utc>>,
    },
    /// Temporarily stopped by an admin
    Paused,
    /// Submissions frozen, waiting for (or retrying) settlement
    Frozen {
        locked_at: DateTime<Utc>,
        payout: Option<PayoutStatus>,
    },
    /// Paid out exactly once
    Settled { completed_at: DateTime<Utc> },
    /// Cancelled or rejected without payout
    Closed { status: CampaignStatus },
}

impl CampaignPhase {
    /// Short label used in the transition audit trail
    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Collecting { .. } => "collecting",
            Self::Refreshing { .. } => "refreshing",
            Self::Paused => "paused",
            Self::Frozen { .. } => "frozen",
            Self::Settled { .. } => "settled",
            Self::Closed { .. } => "closed",
        }
    }

    /// Settlement may run from this phase
    pub fn accepts_settlement(&self) -> bool {
        match self {
            Self::Collecting { .. } | Self::Refreshing { .. } => true,
            Self::Frozen { payout, .. } => *payout != Some(PayoutStatus::Completed),
            _ => false,
        }
    }
}

impl Campaign {
    /// Fold the persisted fields into a [`CampaignPhase`]
    pub fn phase(&self) -> Result<CampaignPhase, TypesError> {
        let inconsistent = |reason: &str| TypesError::InconsistentPhase {
            campaign_id: self.id.to_string(),
            reason: reason.to_string(),
        };

        if self.is_settled() != (self.status == CampaignStatus::Completed) {
            return Err(inconsistent("payout COMPLETED and status COMPLETED must agree"));
        }

        match self.status {
            CampaignStatus::PendingApproval => {
                if self.locked_at.is_some() || self.payout_status.is_some() {
                    return Err(inconsistent("draft campaign carries lock or payout state"));
                }
                Ok(CampaignPhase::Draft)
            }
            CampaignStatus::Paused => Ok(CampaignPhase::Paused),
            CampaignStatus::Cancelled | CampaignStatus::Rejected => {
                Ok(CampaignPhase::Closed { status: self.status })
            }
            CampaignStatus::Completed => {
                let completed_at = self
                    .completed_at
                    .ok_or_else(|| inconsistent("completed campaign without completed_at"))?;
                Ok(CampaignPhase::Settled { completed_at })
            }
            CampaignStatus::Active => {
                if let Some(locked_at) = self.locked_at {
                    return Ok(CampaignPhase::Frozen {
                        locked_at,
                        payout: self.payout_status,
                    });
                }
                if self.payout_status.is_some() {
                    return Err(inconsistent("payout attempted on an unlocked campaign"));
                }
                match self.metrics_processing_at {
                    Some(since) => Ok(CampaignPhase::Refreshing {
                        since,
                        token: self.metrics_lease_token,
                        next_fetch_at: self.next_metrics_fetch_at,
                    }),
                    None => Ok(CampaignPhase::Collecting {
                        next_fetch_at: self.next_metrics_fetch_at,
                    }),
                }
            }
        }
    }
}

/// One row of the campaign transition audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignTransition {
    pub id: TransitionId,
    pub campaign_id: CampaignId,
    pub from_phase: String,
    pub to_phase: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl CampaignTransition {
    pub fn new(
        campaign_id: CampaignId,
        from: &CampaignPhase,
        to: &CampaignPhase,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransitionId::new(),
            campaign_id,
            from_phase: from.label().to_string(),
            to_phase: to.label().to_string(),
            reason: reason.into(),
            at,
        }
    }
}
