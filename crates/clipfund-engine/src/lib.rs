//! Clipfund Engine
//!
//! Orchestration on top of the store, the provider and the scoring crate:
//!
//! - [`MetricsScheduler`]: leased, resumable pull refresh of stale submissions
//! - [`WebhookProcessor`]: idempotent push-path apply
//! - [`EstimateService`]: campaign totals and live earnings estimates
//! - [`Settlement`]: exactly-once payout at campaign end
//! - [`PreLockCron`]: end-of-campaign freeze and on-demand refresh
//!
//! Every component is stateless between calls. All coordination between
//! concurrent invocations goes through the [`Store`].

pub mod clock;
pub mod config;
pub mod error;
pub mod estimates;
pub mod lease;
pub mod lifecycle;
pub mod scheduler;
pub mod settlement;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use clipfund_db::Store;
use clipfund_ingest::MetricsProvider;
use clipfund_scoring::{PointsEngine, RedistributionEngine};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, SchedulerConfig, ScoringConfig};
pub use error::{EngineError, EngineResult};
pub use estimates::{EstimateService, RecomputeReport};
pub use lease::{Lease, LeaseManager};
pub use lifecycle::{next_local_midnight, PreLockCron, PreLockReport};
pub use scheduler::{CampaignRefresh, MetricsScheduler, TickReport};
pub use settlement::{BatchReport, Settlement, SettlementReport};
pub use webhook::{WebhookProcessor, WebhookReport};

/// Collaborators and validated configuration shared by every component
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn Store>,
    pub provider: Arc<dyn MetricsProvider>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<EngineConfig>,
    pub points: PointsEngine,
    pub redistribution: RedistributionEngine,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn MetricsProvider>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let points = PointsEngine::new(config.scoring.weights)?;
        let redistribution = RedistributionEngine::new(config.scoring.redistribution)?;
        Ok(Self {
            store,
            provider,
            clock,
            config: Arc::new(config),
            points,
            redistribution,
        })
    }
}

/// Entry point for the cron and webhook surfaces
#[derive(Clone)]
pub struct Engine {
    ctx: EngineContext,
}

impl Engine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> MetricsScheduler {
        MetricsScheduler::new(self.ctx.clone())
    }

    pub fn webhooks(&self) -> WebhookProcessor {
        WebhookProcessor::new(self.ctx.clone())
    }

    pub fn estimates(&self) -> EstimateService {
        EstimateService::new(self.ctx.clone())
    }

    pub fn settlement(&self) -> Settlement {
        Settlement::new(self.ctx.clone())
    }

    pub fn pre_lock(&self) -> PreLockCron {
        PreLockCron::new(self.ctx.clone())
    }
}
