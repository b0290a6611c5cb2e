//! Per-campaign metrics lease
//!
//! The lease is a timestamp plus a fencing token on the campaign row. It is
//! taken with one conditional update and expires on its own after the TTL, so
//! a crashed invocation never blocks the campaign for longer than that.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use clipfund_db::{NextFetch, Store};
use clipfund_types::{CampaignId, LeaseToken};

use crate::{Clock, EngineResult};

/// A held lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub campaign_id: CampaignId,
    pub token: LeaseToken,
    pub acquired_at: DateTime<Utc>,
}

pub struct LeaseManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Leases taken before this instant are expired
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.ttl
    }

    /// `None` when another invocation holds a live lease or the campaign is no
    /// longer due
    pub async fn acquire(&self, campaign_id: CampaignId) -> EngineResult<Option<Lease>> {
        let now = self.clock.now();
        let token = LeaseToken::new();
        let acquired = self
            .store
            .try_acquire_metrics_lease(campaign_id, now, self.stale_before(now), token)
            .await?;

        if !acquired {
            debug!(campaign_id = %campaign_id, "Metrics lease held elsewhere, skipping");
            return Ok(None);
        }
        debug!(campaign_id = %campaign_id, token = %token, "Metrics lease acquired");
        Ok(Some(Lease {
            campaign_id,
            token,
            acquired_at: now,
        }))
    }

    /// Release and optionally move the schedule. Returns `false` when the lease
    /// expired and someone else took it; their state is left alone.
    pub async fn release(&self, lease: &Lease, next_fetch: NextFetch) -> EngineResult<bool> {
        let released = self
            .store
            .release_metrics_lease(lease.campaign_id, lease.token, next_fetch)
            .await?;
        if !released {
            let held_for = self.clock.now() - lease.acquired_at;
            warn!(
                campaign_id = %lease.campaign_id,
                token = %lease.token,
                held_secs = held_for.num_seconds(),
                "Metrics lease was taken over before release; overlapping refresh detected"
            );
            metrics::counter!("clipfund_lease_overlaps_total").increment(1);
        }
        Ok(released)
    }
}
