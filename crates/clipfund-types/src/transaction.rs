//! Ledger transactions
//!
//! Transactions are created once per settlement action and are never edited,
//! apart from the PENDING -> COMPLETED / REJECTED status move.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CampaignId, SubmissionId, TransactionId, TypesError, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Earning,
    Spend,
    Deposit,
    Withdrawal,
    Adjustment,
}

string_enum!(TransactionType, "transaction type", {
    Earning => "EARNING",
    Spend => "SPEND",
    Deposit => "DEPOSIT",
    Withdrawal => "WITHDRAWAL",
    Adjustment => "ADJUSTMENT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
}

string_enum!(TransactionStatus, "transaction status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Rejected => "REJECTED",
});

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Rejected)
        )
    }

    pub fn transition_to(&self, next: TransactionStatus) -> Result<TransactionStatus, TypesError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TypesError::InvalidTransition {
                kind: "transaction status",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

/// A single ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub campaign_id: Option<CampaignId>,
    pub submission_id: Option<SubmissionId>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_moves() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Completed.can_transition_to(Rejected));
        assert!(Rejected.transition_to(Completed).is_err());
        assert!(Completed.is_terminal());
    }
}
