//! Redistribution engine
//!
//! Splits a campaign's distributable pool among its APPROVED submissions in
//! proportion to points, subject to a per-submission cap. Anything clipped at the
//! cap is handed to the uncapped submissions, again by points, until nobody is
//! above the cap.
//!
//! The arithmetic runs on exact decimals; only the final amounts are rounded down
//! to `money_scale` and the leftover units handed out by largest remainder, so the
//! shares always sum to the pool exactly.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use clipfund_types::{Campaign, InsuranceThresholds, SubmissionId, UserId};

use crate::insurance::Engagement;
use crate::{ScoringError, ScoringResult};

/// Tunables for the capped split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionConfig {
    /// Maximum share of the pool a single submission may receive, in percent
    #[serde(default = "default_cap_percent")]
    pub robin_hood_cap_percent: Decimal,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Decimal places of the currency
    #[serde(default = "default_money_scale")]
    pub money_scale: u32,
}

fn default_cap_percent() -> Decimal {
    dec!(40)
}

fn default_max_iterations() -> u32 {
    100
}

fn default_money_scale() -> u32 {
    2
}

impl Default for RedistributionConfig {
    fn default() -> Self {
        Self {
            robin_hood_cap_percent: default_cap_percent(),
            max_iterations: default_max_iterations(),
            money_scale: default_money_scale(),
        }
    }
}

impl RedistributionConfig {
    /// At most `100 / cap` submissions can sit at the cap, and every pass caps at
    /// least one more, so the bound must cover that many passes plus the final one.
    pub fn min_iterations(&self) -> u32 {
        if self.robin_hood_cap_percent <= Decimal::ZERO {
            return u32::MAX;
        }
        (dec!(100) / self.robin_hood_cap_percent)
            .ceil()
            .to_u32()
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }

    pub fn validate(&self) -> ScoringResult<()> {
        if self.robin_hood_cap_percent <= Decimal::ZERO || self.robin_hood_cap_percent > dec!(100)
        {
            return Err(ScoringError::InvalidConfig(format!(
                "robin_hood_cap_percent must be in (0, 100] (got {})",
                self.robin_hood_cap_percent
            )));
        }
        if self.max_iterations < self.min_iterations() {
            return Err(ScoringError::InvalidConfig(format!(
                "max_iterations {} cannot converge for a {}% cap (need at least {})",
                self.max_iterations,
                self.robin_hood_cap_percent,
                self.min_iterations()
            )));
        }
        if self.money_scale > 8 {
            return Err(ScoringError::InvalidConfig(format!(
                "money_scale must be at most 8 (got {})",
                self.money_scale
            )));
        }
        Ok(())
    }
}

/// `total_budget * (1 - fee/100 - reserve/100)`, rounded down to the money scale
pub fn distributable_pool(
    total_budget: Decimal,
    platform_fee_percent: Decimal,
    safety_reserve_percent: Decimal,
    money_scale: u32,
) -> ScoringResult<Decimal> {
    let deductions = platform_fee_percent + safety_reserve_percent;
    if platform_fee_percent.is_sign_negative()
        || safety_reserve_percent.is_sign_negative()
        || deductions > dec!(100)
    {
        return Err(ScoringError::DeductionsExceedBudget {
            fee: platform_fee_percent.to_string(),
            reserve: safety_reserve_percent.to_string(),
        });
    }
    let pool = total_budget.max(Decimal::ZERO) * (Decimal::ONE - deductions / dec!(100));
    Ok(pool.round_dp_with_strategy(money_scale, RoundingStrategy::ToZero))
}

/// One APPROVED submission entering the split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub submission_id: SubmissionId,
    pub creator_id: UserId,
    pub points: i64,
    pub views: u64,
}

/// A submission's slice of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub submission_id: SubmissionId,
    pub creator_id: UserId,
    pub amount: Decimal,
    pub contribution_percent: Decimal,
    /// Clipped at the cap during redistribution
    pub capped: bool,
}

/// Live-estimate values written back onto a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub submission_id: SubmissionId,
    pub contribution_percent: Decimal,
    pub earnings: Decimal,
}

/// Result of a redistribution run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RedistributionOutcome {
    /// Engagement missed every threshold; the pool goes back to the artist
    InsuranceTriggered {
        pool: Decimal,
        engagement: Engagement,
        thresholds: InsuranceThresholds,
    },
    /// Thresholds passed but there is nobody to pay
    Unallocated { pool: Decimal },
    Distributed {
        pool: Decimal,
        cap: Decimal,
        shares: Vec<Share>,
        iterations: u32,
        /// Every earning submission hit the cap; shares may exceed it
        all_capped: bool,
    },
}

impl RedistributionOutcome {
    pub fn pool(&self) -> Decimal {
        match self {
            Self::InsuranceTriggered { pool, .. }
            | Self::Unallocated { pool }
            | Self::Distributed { pool, .. } => *pool,
        }
    }

    /// Amount returned to the artist
    pub fn refund(&self) -> Decimal {
        match self {
            Self::InsuranceTriggered { pool, .. } | Self::Unallocated { pool } => *pool,
            Self::Distributed { .. } => Decimal::ZERO,
        }
    }

    pub fn shares(&self) -> &[Share] {
        match self {
            Self::Distributed { shares, .. } => shares,
            _ => &[],
        }
    }

    pub fn total_paid(&self) -> Decimal {
        self.shares().iter().map(|s| s.amount).sum()
    }

    pub fn is_insurance_triggered(&self) -> bool {
        matches!(self, Self::InsuranceTriggered { .. })
    }

    /// Per-submission estimates for live display.
    ///
    /// When nothing would be paid the contribution still reflects the points
    /// share, with zero earnings.
    pub fn estimates(&self, participants: &[Participant]) -> Vec<Estimate> {
        match self {
            Self::Distributed { shares, .. } => shares
                .iter()
                .map(|s| Estimate {
                    submission_id: s.submission_id,
                    contribution_percent: s.contribution_percent,
                    earnings: s.amount,
                })
                .collect(),
            _ => {
                let total: i64 = participants.iter().map(|p| p.points.max(0)).sum();
                participants
                    .iter()
                    .map(|p| Estimate {
                        submission_id: p.submission_id,
                        contribution_percent: percent_of(
                            Decimal::from(p.points.max(0)),
                            Decimal::from(total),
                        ),
                        earnings: Decimal::ZERO,
                    })
                    .collect()
            }
        }
    }
}

fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        Decimal::ZERO
    } else {
        (part / whole * dec!(100)).round_dp(4)
    }
}

/// Insurance gate plus capped proportional split
#[derive(Debug, Clone, Copy, Default)]
pub struct RedistributionEngine {
    config: RedistributionConfig,
}

impl RedistributionEngine {
    pub fn new(config: RedistributionConfig) -> ScoringResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RedistributionConfig {
        &self.config
    }

    pub fn pool_for(&self, campaign: &Campaign) -> ScoringResult<Decimal> {
        distributable_pool(
            campaign.total_budget,
            campaign.platform_fee_percent,
            campaign.safety_reserve_percent,
            self.config.money_scale,
        )
    }

    /// Run the full redistribution for a campaign snapshot.
    ///
    /// Pure: the same campaign and participants always give the same outcome.
    pub fn redistribute(
        &self,
        campaign: &Campaign,
        participants: &[Participant],
    ) -> ScoringResult<RedistributionOutcome> {
        let pool = self.pool_for(campaign)?;

        let engagement = Engagement {
            submissions: u32::try_from(participants.len()).unwrap_or(u32::MAX),
            total_points: participants
                .iter()
                .map(|p| p.points.max(0))
                .fold(0i64, i64::saturating_add),
            total_views: participants
                .iter()
                .map(|p| p.views)
                .fold(0u64, u64::saturating_add),
        };

        if engagement.triggers_insurance(&campaign.insurance) {
            return Ok(RedistributionOutcome::InsuranceTriggered {
                pool,
                engagement,
                thresholds: campaign.insurance,
            });
        }
        if participants.is_empty() {
            return Ok(RedistributionOutcome::Unallocated { pool });
        }

        Ok(self.split(pool, participants))
    }

    /// Capped proportional split of `pool`
    pub fn split(&self, pool: Decimal, participants: &[Participant]) -> RedistributionOutcome {
        let scale = self.config.money_scale;
        let unit = Decimal::new(1, scale);
        let cap = (pool * self.config.robin_hood_cap_percent / dec!(100))
            .round_dp_with_strategy(scale, RoundingStrategy::ToZero);

        let total_points: i64 = participants
            .iter()
            .map(|p| p.points.max(0))
            .fold(0i64, i64::saturating_add);
        // with no points at all everyone weighs the same
        let weights: Vec<Decimal> = participants
            .iter()
            .map(|p| {
                if total_points > 0 {
                    Decimal::from(p.points.max(0))
                } else {
                    Decimal::ONE
                }
            })
            .collect();
        let total_weight: Decimal = weights.iter().copied().sum();

        let n = participants.len();
        let mut exact: Vec<Decimal> = weights.iter().map(|w| pool * *w / total_weight).collect();
        let mut capped = vec![false; n];
        let mut iterations = 0u32;
        let mut all_capped = false;

        loop {
            iterations += 1;

            let mut surplus = Decimal::ZERO;
            for i in 0..n {
                if !capped[i] && exact[i] > cap {
                    surplus += exact[i] - cap;
                    exact[i] = cap;
                    capped[i] = true;
                }
            }
            if surplus.is_zero() {
                break;
            }

            let open_weight: Decimal = (0..n)
                .filter(|i| !capped[*i])
                .map(|i| weights[i])
                .sum();
            let open = capped.iter().filter(|c| !**c).count();
            if open == 0 {
                all_capped = true;
                for i in 0..n {
                    exact[i] += surplus * weights[i] / total_weight;
                }
                break;
            }
            if open_weight.is_zero() {
                // only zero-point entries have headroom left
                let each = surplus / Decimal::from(open);
                for i in 0..n {
                    if !capped[i] {
                        exact[i] += each;
                    }
                }
            } else {
                for i in 0..n {
                    if !capped[i] {
                        exact[i] += surplus * weights[i] / open_weight;
                    }
                }
            }

            if iterations >= self.config.max_iterations {
                break;
            }
        }

        let amounts = round_to_pool(&exact, pool, cap, unit, scale, all_capped);

        let shares = participants
            .iter()
            .zip(amounts)
            .zip(capped)
            .map(|((p, amount), capped)| Share {
                submission_id: p.submission_id,
                creator_id: p.creator_id,
                contribution_percent: percent_of(amount, pool),
                amount,
                capped,
            })
            .collect();

        RedistributionOutcome::Distributed {
            pool,
            cap,
            shares,
            iterations,
            all_capped,
        }
    }
}

/// Round every amount down to `scale`, then hand the leftover units to the
/// largest fractional remainders (ties by position) without crossing the cap.
fn round_to_pool(
    exact: &[Decimal],
    pool: Decimal,
    cap: Decimal,
    unit: Decimal,
    scale: u32,
    all_capped: bool,
) -> Vec<Decimal> {
    let mut amounts: Vec<Decimal> = exact
        .iter()
        .map(|x| x.round_dp_with_strategy(scale, RoundingStrategy::ToZero))
        .collect();
    if amounts.is_empty() {
        return amounts;
    }

    let mut order: Vec<usize> = (0..exact.len()).collect();
    order.sort_by(|a, b| {
        let fa = exact[*a] - amounts[*a];
        let fb = exact[*b] - amounts[*b];
        fb.cmp(&fa).then(a.cmp(b))
    });

    let mut leftover = pool - amounts.iter().copied().sum::<Decimal>();
    while leftover >= unit {
        let before = leftover;
        for &i in &order {
            if leftover < unit {
                break;
            }
            if all_capped || amounts[i] + unit <= cap {
                amounts[i] += unit;
                leftover -= unit;
            }
        }
        if leftover == before {
            // nobody has headroom left; keep the books balanced on the top entry
            amounts[order[0]] += leftover;
            break;
        }
    }
    amounts
}
