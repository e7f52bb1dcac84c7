//! Window rate limiter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::{CounterStore, StoreError, WindowSnapshot};
use super::descriptor::WindowKey;
use super::limit::LimitSpec;
use crate::clock::Clock;

/// Counting algorithm used by the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStrategy {
    /// Count the hits in the trailing period ending now. Exact at window
    /// boundaries; costs one stored timestamp per admitted hit.
    #[default]
    MovingWindow,
    /// One counter per bucket that expires a period after its first hit.
    /// O(1) storage, but a client can land up to twice the limit across a
    /// bucket boundary.
    FixedWindow,
}

/// Result of recording a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    pub allowed: bool,
    /// Epoch millisecond at which the window next admits a hit.
    pub reset_at: u64,
    pub remaining: u64,
    pub limit: u64,
}

/// Read-only view of a window, used to stamp response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub reset_at: u64,
    pub remaining: u64,
}

/// The rate limiter shared by every request-handling task.
///
/// All state lives in the counter store; the limiter itself is immutable and
/// cheap to share behind an `Arc`.
pub struct WindowRateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    strategy: WindowStrategy,
    key_prefix: String,
}

impl WindowRateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        strategy: WindowStrategy,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            strategy,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn strategy(&self) -> WindowStrategy {
        self.strategy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn store_key(&self, key: &WindowKey) -> String {
        match self.strategy {
            WindowStrategy::MovingWindow => format!("{}:mw", key.to_store_key(&self.key_prefix)),
            WindowStrategy::FixedWindow => format!("{}:fw", key.to_store_key(&self.key_prefix)),
        }
    }

    /// Record one hit against `key` if the limit allows it.
    ///
    /// A rejected hit is not recorded, so a saturated window never holds more
    /// than `limit.count()` hits.
    pub async fn hit(&self, limit: &LimitSpec, key: &WindowKey) -> Result<HitOutcome, StoreError> {
        let now = self.clock.now_millis();
        let store_key = self.store_key(key);
        let period = limit.period_millis();

        trace!(key = %key, limit = %limit, "Checking rate limit");

        let snapshot = match self.strategy {
            WindowStrategy::MovingWindow => {
                self.store
                    .acquire_moving(&store_key, limit.count(), period, now)
                    .await?
            }
            WindowStrategy::FixedWindow => {
                self.store
                    .acquire_fixed(&store_key, limit.count(), period, now)
                    .await?
            }
        };

        let outcome = Self::outcome(limit, snapshot);
        if !outcome.allowed {
            debug!(key = %key, limit = %limit, reset_at = outcome.reset_at, "Rate limit exceeded");
        }
        Ok(outcome)
    }

    /// Current reset time and remaining quota for `key`, without recording a hit.
    pub async fn get_window_stats(&self, limit: &LimitSpec, key: &WindowKey) -> Result<WindowStats, StoreError> {
        let now = self.clock.now_millis();
        let store_key = self.store_key(key);
        let period = limit.period_millis();

        let snapshot = match self.strategy {
            WindowStrategy::MovingWindow => self.store.moving_window(&store_key, period, now).await?,
            WindowStrategy::FixedWindow => self.store.fixed_window(&store_key, period, now).await?,
        };

        Ok(WindowStats {
            reset_at: snapshot.reset_at,
            remaining: limit.count().saturating_sub(snapshot.count),
        })
    }

    /// Forget every hit recorded against `key`.
    pub async fn clear(&self, key: &WindowKey) -> Result<(), StoreError> {
        self.store.clear(&self.store_key(key)).await
    }

    fn outcome(limit: &LimitSpec, snapshot: WindowSnapshot) -> HitOutcome {
        HitOutcome {
            allowed: snapshot.admitted,
            reset_at: snapshot.reset_at,
            remaining: if snapshot.admitted {
                limit.count().saturating_sub(snapshot.count)
            } else {
                0
            },
            limit: limit.count(),
        }
    }
}
