//! Application state shared across handlers

use std::sync::Arc;

use clipfund_db::Store;
use clipfund_engine::Engine;
use clipfund_ingest::WebhookVerifier;
use tokio_util::task::TaskTracker;

use crate::config::AuthSettings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub store: Arc<dyn Store>,
    pub verifier: Arc<WebhookVerifier>,
    pub auth: Arc<AuthSettings>,
    /// Work accepted by a handler but finished after its response
    pub background: TaskTracker,
}

impl AppState {
    pub fn new(engine: Engine, verifier: WebhookVerifier, auth: AuthSettings) -> Self {
        let store = engine.context().store.clone();
        Self {
            engine,
            store,
            verifier: Arc::new(verifier),
            auth: Arc::new(auth),
            background: TaskTracker::new(),
        }
    }
}
