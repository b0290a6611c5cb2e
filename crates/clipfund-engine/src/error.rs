//! Engine error types

use clipfund_db::DbError;
use clipfund_ingest::IngestError;
use clipfund_scoring::ScoringError;
use clipfund_types::{CampaignId, TypesError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] DbError),

    #[error("Provider error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Invalid campaign state: {0}")]
    State(#[from] TypesError),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("Campaign {campaign_id} cannot be settled from phase {phase}")]
    NotSettleable {
        campaign_id: CampaignId,
        phase: String,
    },

    #[error("Campaign {0} is already settled")]
    AlreadySettled(CampaignId),

    #[error("Invalid engine configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Refused because of the campaign's state, not because something broke
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::NotSettleable { .. }
                | Self::AlreadySettled(_)
                | Self::Store(DbError::AlreadySettled(_))
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
