//! Append-only metric fetch audit log
//!
//! Every scheduler tick, webhook application, on-demand refresh and settlement
//! outcome is written here so an operator can reconstruct what happened without
//! the process logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CampaignId, FetchLogId, SubmissionId};

/// Which path produced a log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchSource {
    Cron,
    PerCampaignCron,
    Webhook,
    OnDemand,
}

string_enum!(FetchSource, "fetch source", {
    Cron => "CRON",
    PerCampaignCron => "PER_CAMPAIGN_CRON",
    Webhook => "WEBHOOK",
    OnDemand => "ON_DEMAND",
});

/// Outcome recorded for a log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchStatus {
    Success,
    Partial,
    Failed,
    Skipped,
    InsuranceTriggered,
}

string_enum!(FetchStatus, "fetch status", {
    Success => "SUCCESS",
    Partial => "PARTIAL",
    Failed => "FAILED",
    Skipped => "SKIPPED",
    InsuranceTriggered => "INSURANCE_TRIGGERED",
});

/// One audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFetchLog {
    pub id: FetchLogId,
    pub campaign_id: Option<CampaignId>,
    pub submission_id: Option<SubmissionId>,
    pub source: FetchSource,
    pub status: FetchStatus,
    pub error_message: Option<String>,
    pub metrics_snapshot: Option<serde_json::Value>,
    /// Provider event id; (event id, submission id) is unique
    pub webhook_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MetricFetchLog {
    pub fn new(source: FetchSource, status: FetchStatus, at: DateTime<Utc>) -> Self {
        Self {
            id: FetchLogId::new(),
            campaign_id: None,
            submission_id: None,
            source,
            status,
            error_message: None,
            metrics_snapshot: None,
            webhook_event_id: None,
            created_at: at,
        }
    }

    pub fn campaign(mut self, id: CampaignId) -> Self {
        self.campaign_id = Some(id);
        self
    }

    pub fn submission(mut self, id: SubmissionId) -> Self {
        self.submission_id = Some(id);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn snapshot(mut self, value: serde_json::Value) -> Self {
        self.metrics_snapshot = Some(value);
        self
    }

    pub fn event(mut self, event_id: impl Into<String>) -> Self {
        self.webhook_event_id = Some(event_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_optional_fields() {
        let campaign = CampaignId::new();
        let log = MetricFetchLog::new(FetchSource::Webhook, FetchStatus::Skipped, Utc::now())
            .campaign(campaign)
            .event("evt_1")
            .error("no matching submission");
        assert_eq!(log.campaign_id, Some(campaign));
        assert_eq!(log.webhook_event_id.as_deref(), Some("evt_1"));
        assert!(log.submission_id.is_none());
    }

    #[test]
    fn status_text_matches_storage() {
        assert_eq!(FetchStatus::InsuranceTriggered.as_str(), "INSURANCE_TRIGGERED");
        assert_eq!(
            "PER_CAMPAIGN_CRON".parse::<FetchSource>().unwrap(),
            FetchSource::PerCampaignCron
        );
    }
}
