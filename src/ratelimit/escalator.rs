//! Abuse escalation for addresses that keep exhausting the global limit.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::backend::{CounterStore, StoreError};
use crate::clock::Clock;

/// Reference threshold: global-limit rejections per window before a ban.
pub const DEFAULT_THRESHOLD: u64 = 60;
/// Reference tendency window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Abuse state of one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tendency {
    /// Global-limit rejections counted in the current window.
    pub count: u64,
    pub banned: bool,
    /// Epoch millisecond at which the counter and any ban clear.
    pub reset_at: u64,
}

impl Tendency {
    fn clean(now: u64) -> Self {
        Self {
            count: 0,
            banned: false,
            reset_at: now,
        }
    }

    /// Whether the address is merely rate limited rather than banned.
    pub fn still_allowed(&self) -> bool {
        !self.banned
    }
}

/// Tracks how often each address triggers the global limit.
///
/// The counter window starts at the first trigger and is not extended by
/// later ones, so the counter and the ban it implies expire together.
pub struct AbuseEscalator {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    threshold: u64,
    window: Duration,
    key_prefix: String,
}

impl AbuseEscalator {
    /// A `threshold` of 0 is treated as 1: an address with no triggers is
    /// never banned.
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        threshold: u64,
        window: Duration,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            threshold: threshold.max(1),
            window,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    fn key(&self, address: &str) -> String {
        format!("{}:tendency:{}", self.key_prefix, address)
    }

    /// Count one global-limit rejection for `address`.
    pub async fn record_trigger(&self, address: &str) -> Result<Tendency, StoreError> {
        let now = self.clock.now_millis();
        let counter = self
            .store
            .incr(&self.key(address), self.window.as_millis() as u64, now)
            .await?;

        let tendency = Tendency {
            count: counter.value,
            banned: counter.value >= self.threshold,
            reset_at: counter.expires_at,
        };

        if counter.value == self.threshold {
            info!(
                address,
                triggers = counter.value,
                reset_at = tendency.reset_at,
                "Address banned for repeatedly exceeding the global rate limit"
            );
        } else {
            debug!(address, triggers = counter.value, "Recorded global rate limit trigger");
        }

        Ok(tendency)
    }

    /// Current state of `address` without counting anything.
    pub async fn status(&self, address: &str) -> Result<Tendency, StoreError> {
        let now = self.clock.now_millis();
        Ok(match self.store.get_counter(&self.key(address), now).await? {
            Some(counter) => Tendency {
                count: counter.value,
                banned: counter.value >= self.threshold,
                reset_at: counter.expires_at,
            },
            None => Tendency::clean(now),
        })
    }

    /// Lift any ban on `address` and forget its history.
    pub async fn pardon(&self, address: &str) -> Result<(), StoreError> {
        self.store.clear(&self.key(address)).await
    }
}
