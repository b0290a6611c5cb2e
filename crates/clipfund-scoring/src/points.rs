//! Points engine
//!
//! `points = floor(count * weight)` per metric. Weights are non-negative, so each
//! component is monotonic non-decreasing in its counter and zero counters give
//! zero points. Comments are tracked but not scored.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use clipfund_types::{EngagementCounters, PointsBreakdown, Submission};

use crate::{ScoringError, ScoringResult};

/// Points awarded per unit of each metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsWeights {
    #[serde(default = "default_per_view")]
    pub per_view: Decimal,
    #[serde(default = "default_per_like")]
    pub per_like: Decimal,
    #[serde(default = "default_per_share")]
    pub per_share: Decimal,
}

fn default_per_view() -> Decimal {
    dec!(0.01) // 1 point per 100 views
}

fn default_per_like() -> Decimal {
    dec!(0.5)
}

fn default_per_share() -> Decimal {
    dec!(1)
}

impl Default for PointsWeights {
    fn default() -> Self {
        Self {
            per_view: default_per_view(),
            per_like: default_per_like(),
            per_share: default_per_share(),
        }
    }
}

impl PointsWeights {
    pub fn validate(&self) -> ScoringResult<()> {
        for (name, weight) in [
            ("per_view", self.per_view),
            ("per_like", self.per_like),
            ("per_share", self.per_share),
        ] {
            if weight.is_sign_negative() {
                return Err(ScoringError::InvalidConfig(format!(
                    "points weight {} must not be negative (got {})",
                    name, weight
                )));
            }
        }
        Ok(())
    }
}

/// Deterministic scoring of engagement counters
#[derive(Debug, Clone, Copy, Default)]
pub struct PointsEngine {
    weights: PointsWeights,
}

impl PointsEngine {
    pub fn new(weights: PointsWeights) -> ScoringResult<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &PointsWeights {
        &self.weights
    }

    /// Score raw counters
    pub fn score(&self, views: u64, likes: u64, shares: u64) -> PointsBreakdown {
        let view_points = weighted(views, self.weights.per_view);
        let like_points = weighted(likes, self.weights.per_like);
        let share_points = weighted(shares, self.weights.per_share);
        PointsBreakdown {
            view_points,
            like_points,
            share_points,
            total_points: view_points
                .saturating_add(like_points)
                .saturating_add(share_points),
        }
    }

    pub fn score_counters(&self, counters: &EngagementCounters) -> PointsBreakdown {
        self.score(counters.views, counters.likes, counters.shares)
    }

    /// Sum of points over APPROVED submissions, the value stored as campaign total
    pub fn campaign_total<'a>(&self, submissions: impl IntoIterator<Item = &'a Submission>) -> i64 {
        submissions
            .into_iter()
            .filter(|s| s.is_approved())
            .map(|s| s.points.total_points)
            .fold(0i64, i64::saturating_add)
    }
}

fn weighted(count: u64, weight: Decimal) -> i64 {
    (Decimal::from(count) * weight)
        .floor()
        .to_i64()
        .unwrap_or(i64::MAX)
}
