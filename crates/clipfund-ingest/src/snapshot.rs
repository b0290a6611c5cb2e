//! Normalized metrics snapshot
//!
//! Provider responses are loosely typed: counters arrive as numbers, numeric
//! strings or nulls under several spellings. Everything is folded into a
//! [`MetricsSnapshot`] at this boundary; nothing past it sees raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use clipfund_types::EngagementCounters;

use crate::{IngestError, IngestResult};

/// Bumped whenever the normalized shape changes
pub const SNAPSHOT_SCHEMA_VERSION: u16 = 1;

const VIEW_KEYS: &[&str] = &["views", "viewCount", "view_count", "playCount", "play_count"];
const LIKE_KEYS: &[&str] = &["likes", "likeCount", "like_count", "diggCount"];
const COMMENT_KEYS: &[&str] = &["comments", "commentCount", "comment_count"];
const SHARE_KEYS: &[&str] = &["shares", "shareCount", "share_count"];
const ID_KEYS: &[&str] = &["contentId", "content_id", "id"];
const PRIVATE_KEYS: &[&str] = &["isPrivate", "is_private", "private"];

/// Validated engagement observation for one piece of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub schema_version: u16,
    pub content_id: Option<String>,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub fetched_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn new(counters: EngagementCounters, fetched_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            content_id: None,
            views: counters.views,
            likes: counters.likes,
            comments: counters.comments,
            shares: counters.shares,
            fetched_at,
        }
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Normalize one provider object.
    ///
    /// Private content is reported as [`IngestError::ContentUnavailable`].
    pub fn from_value(value: &Value, fetched_at: DateTime<Utc>) -> IngestResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| IngestError::InvalidResponse("metrics payload is not an object".into()))?;

        if PRIVATE_KEYS
            .iter()
            .any(|k| obj.get(*k).and_then(Value::as_bool).unwrap_or(false))
        {
            return Err(IngestError::unavailable("content is private"));
        }

        Ok(Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            content_id: ID_KEYS.iter().find_map(|k| string_field(obj, k)),
            views: counter(obj, VIEW_KEYS)?,
            likes: counter(obj, LIKE_KEYS)?,
            comments: counter(obj, COMMENT_KEYS)?,
            shares: counter(obj, SHARE_KEYS)?,
            fetched_at,
        })
    }

    pub fn counters(&self) -> EngagementCounters {
        EngagementCounters {
            views: self.views,
            likes: self.likes,
            comments: self.comments,
            shares: self.shares,
        }
    }

    /// JSON stored in the audit log row
    pub fn to_log_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Content the provider answered for but could not measure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableContent {
    pub content_id: String,
    pub reason: String,
}

/// Answer to a bulk metrics request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMetrics {
    pub snapshots: Vec<MetricsSnapshot>,
    /// Private or removed content; a permanent condition, not a retry
    pub unavailable: Vec<UnavailableContent>,
}

impl BulkMetrics {
    /// Normalize the raw items of a bulk response.
    ///
    /// Items without a content id cannot be matched to anything and are
    /// dropped, as are items whose counters fail validation.
    pub fn from_items(items: &[Value], fetched_at: DateTime<Utc>) -> Self {
        let mut bulk = Self::default();
        for item in items {
            let content_id = item
                .as_object()
                .and_then(|obj| ID_KEYS.iter().find_map(|k| string_field(obj, k)));
            match (MetricsSnapshot::from_value(item, fetched_at), content_id) {
                (Ok(snapshot), Some(_)) => bulk.snapshots.push(snapshot),
                (Err(IngestError::ContentUnavailable { reason }), Some(content_id)) => {
                    bulk.unavailable.push(UnavailableContent { content_id, reason })
                }
                (Ok(_), None) | (Err(_), None) => warn!("Dropping bulk item without a content id"),
                (Err(e), Some(content_id)) => {
                    warn!(content_id = %content_id, error = %e, "Dropping unusable bulk item")
                }
            }
        }
        bulk
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.unavailable.is_empty()
    }
}

impl From<Vec<MetricsSnapshot>> for BulkMetrics {
    fn from(snapshots: Vec<MetricsSnapshot>) -> Self {
        Self {
            snapshots,
            unavailable: Vec::new(),
        }
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First present key wins; missing or null counts as zero
fn counter(obj: &Map<String, Value>, keys: &[&str]) -> IngestResult<u64> {
    let Some((key, value)) = keys
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
    else {
        return Ok(0);
    };

    let invalid = || IngestError::InvalidResponse(format!("{} is not a count: {}", key, value));
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else if n.as_i64().is_some() {
                Err(invalid())
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.trunc() as u64)
                    .ok_or_else(invalid)
            }
        }
        Value::String(s) => s.trim().replace(',', "").parse::<u64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_alternate_spellings() {
        let now = Utc::now();
        let snap = MetricsSnapshot::from_value(
            &json!({"id": 123, "playCount": "1,204", "diggCount": 87, "commentCount": null, "shareCount": 4.0}),
            now,
        )
        .unwrap();
        assert_eq!(snap.content_id.as_deref(), Some("123"));
        assert_eq!(snap.views, 1_204);
        assert_eq!(snap.likes, 87);
        assert_eq!(snap.comments, 0);
        assert_eq!(snap.shares, 4);
        assert_eq!(snap.schema_version, SNAPSHOT_SCHEMA_VERSION);
    }

    #[test]
    fn private_content_is_permanent() {
        let err = MetricsSnapshot::from_value(&json!({"views": 10, "isPrivate": true}), Utc::now())
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn negative_counts_are_rejected() {
        let err = MetricsSnapshot::from_value(&json!({"views": -3}), Utc::now()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidResponse(_)));
        assert!(MetricsSnapshot::from_value(&json!([1, 2]), Utc::now()).is_err());
        assert!(MetricsSnapshot::from_value(&json!({"likes": "lots"}), Utc::now()).is_err());
    }

    #[test]
    fn bulk_items_split_into_snapshots_and_unavailable() {
        let items = vec![
            json!({"contentId": "111", "views": 40}),
            json!({"contentId": "222", "views": 10, "isPrivate": true}),
            json!({"views": 5}),
            json!({"contentId": "333", "views": "many"}),
        ];
        let bulk = BulkMetrics::from_items(&items, Utc::now());

        assert_eq!(bulk.snapshots.len(), 1);
        assert_eq!(bulk.snapshots[0].content_id.as_deref(), Some("111"));
        assert_eq!(
            bulk.unavailable,
            vec![UnavailableContent {
                content_id: "222".into(),
                reason: "content is private".into(),
            }]
        );
    }

    #[test]
    fn log_value_carries_schema_version() {
        let snap = MetricsSnapshot::new(EngagementCounters::default(), Utc::now());
        assert_eq!(snap.to_log_value()["schema_version"], json!(1));
    }
}
