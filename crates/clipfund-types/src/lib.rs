//! Clipfund Types - Canonical domain types for the creator payout engine
//!
//! This crate contains the foundational types shared by every other clipfund crate:
//!
//! - Identity types (CampaignId, SubmissionId, UserId, ...)
//! - Campaign records, their status enums and the explicit lifecycle phase
//! - Submissions with engagement counters and points
//! - The append-only metric fetch audit log
//! - Ledger transactions
//!
//! Persisted enums round-trip through `as_str` / `FromStr` using the
//! SCREAMING_SNAKE_CASE spelling stored in the database.

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum stored as text.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Persisted spelling of this variant
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::error::TypesError::unknown($kind, other)),
                }
            }
        }
    };
}

pub mod identity;
pub mod campaign;
pub mod phase;
pub mod submission;
pub mod fetch_log;
pub mod transaction;
pub mod error;

pub use identity::*;
pub use campaign::*;
pub use phase::*;
pub use submission::*;
pub use fetch_log::*;
pub use transaction::*;
pub use error::*;

/// Version of the clipfund types schema
pub const TYPES_VERSION: &str = "0.1.0";
