//! Single-flight TTL cell
//!
//! Holds one lazily-resolved value (e.g. the provider's platform id) that
//! expires after a TTL. Concurrent callers during a refresh wait for the one
//! in-flight initializer instead of issuing their own lookup.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct TtlCell<T> {
    ttl: Duration,
    slot: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value, or run `init` once to refresh it.
    ///
    /// A failed `init` leaves the cell empty so the next caller retries.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((value, fetched)) = slot.as_ref() {
            if fetched.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }
        let value = init().await?;
        *slot = Some((value.clone(), Instant::now()));
        Ok(value)
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    pub async fn peek(&self) -> Option<T> {
        self.slot.lock().await.as_ref().map(|(v, _)| v.clone())
    }
}
