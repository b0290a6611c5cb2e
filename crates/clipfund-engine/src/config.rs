//! Engine configuration

use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use clipfund_scoring::{PointsWeights, RedistributionConfig};

use crate::{EngineError, EngineResult};

/// Everything the engine needs to know up front
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// Batch sizes and timing of the refresh cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Campaigns leased per tick
    #[serde(default = "default_max_campaigns_per_tick")]
    pub max_campaigns_per_tick: u32,

    /// Stale submissions refreshed per campaign per tick
    #[serde(default = "default_max_submissions_per_tick")]
    pub max_submissions_per_tick: u32,

    /// Parallel provider calls within one sub-batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Metrics lease TTL
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: i64,

    /// Length of one refresh cycle
    #[serde(default = "default_cycle_hours")]
    pub cycle_hours: i64,

    /// A submission checked within this window before the due time counts as fresh
    #[serde(default = "default_staleness_window_hours")]
    pub staleness_window_hours: i64,

    /// How long before `end_date` the pre-lock cron freezes a campaign
    #[serde(default = "default_lock_lead_minutes")]
    pub lock_lead_minutes: i64,

    /// Extra buffer before the lock during which no cycle is scheduled
    #[serde(default = "default_safety_margin_minutes")]
    pub safety_margin_minutes: i64,

    /// Content ids per bulk fetch on the webhook path
    #[serde(default = "default_webhook_chunk_size")]
    pub webhook_chunk_size: usize,

    /// Offset of the operator's local time zone, for the pre-lock midnight
    #[serde(default)]
    pub local_utc_offset_minutes: i32,
}

fn default_max_campaigns_per_tick() -> u32 {
    3
}

fn default_max_submissions_per_tick() -> u32 {
    500
}

fn default_batch_size() -> usize {
    50
}

fn default_stale_lock_secs() -> i64 {
    600
}

fn default_cycle_hours() -> i64 {
    24
}

fn default_staleness_window_hours() -> i64 {
    23
}

fn default_lock_lead_minutes() -> i64 {
    60
}

fn default_safety_margin_minutes() -> i64 {
    30
}

fn default_webhook_chunk_size() -> usize {
    50
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_campaigns_per_tick: default_max_campaigns_per_tick(),
            max_submissions_per_tick: default_max_submissions_per_tick(),
            batch_size: default_batch_size(),
            stale_lock_secs: default_stale_lock_secs(),
            cycle_hours: default_cycle_hours(),
            staleness_window_hours: default_staleness_window_hours(),
            lock_lead_minutes: default_lock_lead_minutes(),
            safety_margin_minutes: default_safety_margin_minutes(),
            webhook_chunk_size: default_webhook_chunk_size(),
            local_utc_offset_minutes: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.stale_lock_secs)
    }

    pub fn cycle(&self) -> Duration {
        Duration::hours(self.cycle_hours)
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::hours(self.staleness_window_hours)
    }

    /// No cycle may be scheduled this close to `end_date`
    pub fn end_buffer(&self) -> Duration {
        Duration::minutes(self.lock_lead_minutes + self.safety_margin_minutes)
    }

    pub fn local_offset(&self) -> EngineResult<FixedOffset> {
        FixedOffset::east_opt(self.local_utc_offset_minutes * 60).ok_or_else(|| {
            EngineError::Config(format!(
                "local_utc_offset_minutes out of range: {}",
                self.local_utc_offset_minutes
            ))
        })
    }

    pub fn validate(&self) -> EngineResult<()> {
        let positive = [
            ("max_campaigns_per_tick", i64::from(self.max_campaigns_per_tick)),
            ("max_submissions_per_tick", i64::from(self.max_submissions_per_tick)),
            ("stale_lock_secs", self.stale_lock_secs),
            ("cycle_hours", self.cycle_hours),
            ("staleness_window_hours", self.staleness_window_hours),
        ];
        for (name, value) in positive {
            if value < 1 {
                return Err(EngineError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.batch_size == 0 || self.webhook_chunk_size == 0 {
            return Err(EngineError::Config(
                "batch_size and webhook_chunk_size must be at least 1".into(),
            ));
        }
        if self.staleness_window_hours >= self.cycle_hours {
            return Err(EngineError::Config(format!(
                "staleness_window_hours ({}) must be shorter than cycle_hours ({})",
                self.staleness_window_hours, self.cycle_hours
            )));
        }
        if self.lock_lead_minutes < 0 || self.safety_margin_minutes < 0 {
            return Err(EngineError::Config("lock lead and safety margin must not be negative".into()));
        }
        self.local_offset()?;
        Ok(())
    }
}

/// Point weights and redistribution tunables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: PointsWeights,

    #[serde(default)]
    pub redistribution: RedistributionConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.scheduler.validate()?;
        self.scoring.weights.validate()?;
        self.scoring.redistribution.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scheduler.max_campaigns_per_tick, 3);
        assert_eq!(config.scheduler.max_submissions_per_tick, 500);
        assert_eq!(config.scheduler.lease_ttl(), Duration::minutes(10));
        assert_eq!(config.scheduler.end_buffer(), Duration::minutes(90));
    }

    #[test]
    fn rejects_window_longer_than_cycle() {
        let mut config = EngineConfig::default();
        config.scheduler.staleness_window_hours = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_batches_and_bad_offsets() {
        let mut config = EngineConfig::default();
        config.scheduler.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scheduler.local_utc_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn scoring_errors_surface() {
        let mut config = EngineConfig::default();
        config.scoring.redistribution.robin_hood_cap_percent = rust_decimal::Decimal::ZERO;
        assert!(matches!(config.validate(), Err(EngineError::Scoring(_))));
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"scheduler": {"batch_size": 10}}"#).unwrap();
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.scheduler.cycle_hours, 24);
        assert_eq!(config.scoring.redistribution.max_iterations, 100);
    }
}
