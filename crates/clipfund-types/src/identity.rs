//! Identity types for Clipfund
//!
//! All identity types are strongly typed wrappers around UUIDs so a submission id
//! can never be passed where a campaign id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
    };
}

define_id_type!(CampaignId, "cmp", "Unique identifier for a campaign");
define_id_type!(SubmissionId, "sub", "Unique identifier for a creator submission");
define_id_type!(UserId, "user", "Unique identifier for a platform user (creator or artist)");
define_id_type!(FetchLogId, "fetchlog", "Unique identifier for a metric fetch audit row");
define_id_type!(TransactionId, "tx", "Unique identifier for a ledger transaction");
define_id_type!(TransitionId, "transition", "Unique identifier for a campaign transition record");
define_id_type!(LeaseToken, "lease", "Fencing token written on every metrics lease acquisition");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        let id = CampaignId::new();
        assert!(id.to_string().starts_with("cmp_"));
    }

    #[test]
    fn parse_accepts_prefixed_and_bare() {
        let id = SubmissionId::new();
        assert_eq!(SubmissionId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(SubmissionId::parse(&id.0.to_string()).unwrap(), id);
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.0));
    }
}
