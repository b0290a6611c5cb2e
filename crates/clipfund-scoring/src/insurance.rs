//! Insurance tiers
//!
//! Larger budgets must reach proportionally more engagement before creators
//! are paid. The gate only fires when *every* metric misses its threshold.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use clipfund_types::InsuranceThresholds;

/// Budget tier a campaign falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    Starter,
    Growth,
    Pro,
    Premium,
}

impl BudgetTier {
    pub fn from_budget(total_budget: Decimal) -> Self {
        if total_budget >= dec!(100000) {
            BudgetTier::Premium
        } else if total_budget >= dec!(70000) {
            BudgetTier::Pro
        } else if total_budget >= dec!(40000) {
            BudgetTier::Growth
        } else {
            BudgetTier::Starter
        }
    }

    pub fn thresholds(&self) -> InsuranceThresholds {
        match self {
            BudgetTier::Premium => InsuranceThresholds {
                min_submissions: 15,
                min_points: 15_000,
                min_views: 1_500_000,
            },
            BudgetTier::Pro => InsuranceThresholds {
                min_submissions: 8,
                min_points: 5_000,
                min_views: 500_000,
            },
            BudgetTier::Growth => InsuranceThresholds {
                min_submissions: 5,
                min_points: 2_000,
                min_views: 200_000,
            },
            BudgetTier::Starter => InsuranceThresholds {
                min_submissions: 3,
                min_points: 500,
                min_views: 50_000,
            },
        }
    }
}

pub fn thresholds_for_budget(total_budget: Decimal) -> InsuranceThresholds {
    BudgetTier::from_budget(total_budget).thresholds()
}

/// Aggregate engagement over a campaign's APPROVED submissions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub submissions: u32,
    pub total_points: i64,
    pub total_views: u64,
}

impl Engagement {
    /// All three metrics below their thresholds
    pub fn triggers_insurance(&self, thresholds: &InsuranceThresholds) -> bool {
        self.submissions < thresholds.min_submissions
            && self.total_points < thresholds.min_points
            && self.total_views < thresholds.min_views
    }
}
