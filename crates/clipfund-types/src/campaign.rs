//! Campaign records
//!
//! A campaign is an artist's fixed budget that is paid out to creators in
//! proportion to the engagement their submissions earn.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CampaignId, LeaseToken, TypesError, UserId};

/// Administrative status of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    PendingApproval,
    Active,
    Paused,
    Cancelled,
    Rejected,
    Completed,
}

string_enum!(CampaignStatus, "campaign status", {
    PendingApproval => "PENDING_APPROVAL",
    Active => "ACTIVE",
    Paused => "PAUSED",
    Cancelled => "CANCELLED",
    Rejected => "REJECTED",
    Completed => "COMPLETED",
});

impl CampaignStatus {
    /// Check if no further status change is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Rejected | Self::Completed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (PendingApproval, Active)
                | (PendingApproval, Rejected)
                | (PendingApproval, Cancelled)
                | (Active, Paused)
                | (Active, Completed)
                | (Active, Cancelled)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }

    /// Validate a transition, returning the target status
    pub fn transition_to(&self, next: CampaignStatus) -> Result<CampaignStatus, TypesError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TypesError::InvalidTransition {
                kind: "campaign status",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

/// Settlement progress of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
}

string_enum!(PayoutStatus, "payout status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

impl PayoutStatus {
    /// COMPLETED is write-once; everything else may still be retried
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Minimum engagement a campaign must reach before creators are paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceThresholds {
    pub min_submissions: u32,
    pub min_points: i64,
    pub min_views: u64,
}

/// A campaign as persisted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    /// Owner of the budget; receives the refund when insurance triggers
    pub artist_id: UserId,
    pub title: String,
    pub status: CampaignStatus,
    pub total_budget: Decimal,
    pub remaining_budget: Decimal,
    pub platform_fee_percent: Decimal,
    pub safety_reserve_percent: Decimal,
    /// Sum of `total_points` over APPROVED submissions
    pub total_points: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Submission freeze; set by the pre-end lock cron or by settlement
    pub locked_at: Option<DateTime<Utc>>,
    /// Metrics refresh lease; stale after the configured TTL
    pub metrics_processing_at: Option<DateTime<Utc>>,
    pub metrics_lease_token: Option<LeaseToken>,
    /// Next tick at which the refresh cycle is due; `None` stops scheduling
    pub next_metrics_fetch_at: Option<DateTime<Utc>>,
    pub payout_status: Option<PayoutStatus>,
    pub payout_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub insurance: InsuranceThresholds,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Submissions can no longer enter or change once the campaign is locked
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.payout_status == Some(PayoutStatus::Completed)
    }

    /// Whether the metrics lease is currently held by someone, given the lease TTL
    pub fn lease_held(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        matches!(self.metrics_processing_at, Some(at) if at > now - ttl)
    }

    /// Eligible for the distribute cron: active, frozen, ended and not yet paid
    pub fn awaiting_settlement(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active
            && self.is_locked()
            && self.end_date <= now
            && !self.is_settled()
    }
}
