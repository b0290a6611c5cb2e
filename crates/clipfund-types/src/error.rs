//! Error types for Clipfund domain types

use thiserror::Error;

/// Result type for domain-type operations
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors raised while decoding or transitioning domain types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// A persisted enum column held an unknown value
    #[error("Unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    /// The persisted timestamps of a campaign do not describe any valid phase
    #[error("Campaign {campaign_id} is in an impossible state: {reason}")]
    InconsistentPhase { campaign_id: String, reason: String },

    /// A status change that the lifecycle does not allow
    #[error("Invalid {kind} transition: {from} -> {to}")]
    InvalidTransition {
        kind: &'static str,
        from: String,
        to: String,
    },
}

impl TypesError {
    pub(crate) fn unknown(kind: &'static str, value: &str) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.to_string(),
        }
    }
}
