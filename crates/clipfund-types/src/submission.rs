//! Creator submissions and their engagement counters

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CampaignId, SubmissionId, UserId};

/// Review status of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

string_enum!(SubmissionStatus, "submission status", {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

/// Last observed engagement for a piece of content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounters {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

/// Points derived from the counters by the points engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsBreakdown {
    pub view_points: i64,
    pub like_points: i64,
    pub share_points: i64,
    pub total_points: i64,
}

impl PointsBreakdown {
    pub fn is_zero(&self) -> bool {
        self.total_points == 0
    }
}

/// A creator's content entered into a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub campaign_id: CampaignId,
    pub creator_id: UserId,
    pub status: SubmissionStatus,
    /// Public URL the pull path fetches
    pub content_url: String,
    /// Provider-side content id the push path matches on
    pub external_content_id: String,
    /// Provider account the content was posted from (on-demand refresh target)
    pub provider_account_id: Option<String>,
    pub counters: EngagementCounters,
    pub points: PointsBreakdown,
    /// Share of the pool in percent, from the latest redistribution run
    pub contribution_percent: Decimal,
    /// Estimated while live, final after settlement
    pub total_earnings: Decimal,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Not refreshed since `cutoff` (or never)
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        match self.last_checked_at {
            None => true,
            Some(at) => at < cutoff,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == SubmissionStatus::Approved
    }
}
