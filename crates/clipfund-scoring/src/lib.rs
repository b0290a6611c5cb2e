//! Clipfund Scoring
//!
//! Pure, side-effect-free business math for the payout engine:
//!
//! - [`points`]: engagement counters to points
//! - [`insurance`]: budget tiers and the minimum-engagement gate
//! - [`redistribution`]: distributable pool and the capped ("Robin Hood")
//!   proportional split
//!
//! Nothing in this crate touches storage; the engine crate feeds it snapshots
//! and persists what it returns.

pub mod points;
pub mod insurance;
pub mod redistribution;

pub use points::{PointsEngine, PointsWeights};
pub use insurance::{thresholds_for_budget, BudgetTier, Engagement};
pub use redistribution::{
    distributable_pool, Estimate, Participant, RedistributionConfig, RedistributionEngine,
    RedistributionOutcome, Share,
};

use thiserror::Error;

/// Scoring configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    #[error("Invalid scoring configuration: {0}")]
    InvalidConfig(String),

    #[error("Campaign deductions exceed budget: fee {fee}% + reserve {reserve}%")]
    DeductionsExceedBudget { fee: String, reserve: String },
}

pub type ScoringResult<T> = Result<T, ScoringError>;
