//! In-process counter store.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::backend::{CounterSnapshot, CounterStore, StoreError, WindowSnapshot};
use crate::clock::Clock;

/// Hit log for one moving window, oldest first.
#[derive(Debug, Default)]
struct WindowLog {
    hits: VecDeque<u64>,
    expires_at: u64,
}

impl WindowLog {
    fn prune(&mut self, window: u64, now: u64) {
        while let Some(&oldest) = self.hits.front() {
            if oldest + window > now {
                break;
            }
            self.hits.pop_front();
        }
    }
}

/// Counter store backed by concurrent maps.
///
/// Every operation goes through the map's entry API, which holds the shard
/// lock for the whole read-modify-write. Two tasks hitting the same key are
/// therefore serialised and can never both observe free capacity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, WindowLog>,
    counters: DashMap<String, CounterSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry whose window has elapsed.
    pub fn purge_expired(&self, now: u64) -> usize {
        let before = self.len();
        self.windows.retain(|_, log| log.expires_at > now);
        self.counters.retain(|_, counter| counter.expires_at > now);
        before.saturating_sub(self.len())
    }

    /// Number of live keys, expired or not.
    pub fn len(&self) -> usize {
        self.windows.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically purge expired entries until the runtime shuts down.
    pub fn spawn_cleanup(self: Arc<Self>, every: Duration, clock: Arc<dyn Clock>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired(clock.now_millis());
                if purged > 0 {
                    debug!(purged, remaining = self.len(), "Purged expired counters");
                }
            }
        })
    }

    fn live_counter(&self, key: &str, now: u64) -> Option<CounterSnapshot> {
        self.counters
            .get(key)
            .map(|c| *c)
            .filter(|c| c.expires_at > now)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn acquire_moving(&self, key: &str, limit: u64, window: u64, now: u64) -> Result<WindowSnapshot, StoreError> {
        let snapshot = {
            let mut log = self.windows.entry(key.to_string()).or_default();
            log.prune(window, now);

            let admitted = (log.hits.len() as u64) < limit;
            if admitted {
                log.hits.push_back(now);
                log.expires_at = now + window;
            }

            WindowSnapshot {
                admitted,
                count: log.hits.len() as u64,
                reset_at: log.hits.front().map_or(now + window, |oldest| oldest + window),
            }
        };

        if snapshot.count == 0 {
            self.windows.remove_if(key, |_, log| log.hits.is_empty());
        }

        trace!(key, admitted = snapshot.admitted, count = snapshot.count, "Moving window acquire");
        Ok(snapshot)
    }

    async fn moving_window(&self, key: &str, window: u64, now: u64) -> Result<WindowSnapshot, StoreError> {
        let snapshot = match self.windows.get(key) {
            Some(log) => {
                let mut live = log.hits.iter().filter(|&&t| t + window > now);
                let oldest = live.next().copied();
                WindowSnapshot {
                    admitted: false,
                    count: oldest.map_or(0, |_| 1 + live.count() as u64),
                    reset_at: oldest.map_or(now + window, |t| t + window),
                }
            }
            None => WindowSnapshot {
                admitted: false,
                count: 0,
                reset_at: now + window,
            },
        };
        Ok(snapshot)
    }

    async fn acquire_fixed(&self, key: &str, limit: u64, window: u64, now: u64) -> Result<WindowSnapshot, StoreError> {
        let mut bucket = self.counters.entry(key.to_string()).or_insert(CounterSnapshot {
            value: 0,
            expires_at: now + window,
        });
        if bucket.expires_at <= now {
            *bucket = CounterSnapshot {
                value: 0,
                expires_at: now + window,
            };
        }

        let admitted = bucket.value < limit;
        if admitted {
            bucket.value += 1;
        }

        Ok(WindowSnapshot {
            admitted,
            count: bucket.value,
            reset_at: bucket.expires_at,
        })
    }

    async fn fixed_window(&self, key: &str, window: u64, now: u64) -> Result<WindowSnapshot, StoreError> {
        Ok(match self.live_counter(key, now) {
            Some(bucket) => WindowSnapshot {
                admitted: false,
                count: bucket.value,
                reset_at: bucket.expires_at,
            },
            None => WindowSnapshot {
                admitted: false,
                count: 0,
                reset_at: now + window,
            },
        })
    }

    async fn incr(&self, key: &str, expiry: u64, now: u64) -> Result<CounterSnapshot, StoreError> {
        let mut counter = self.counters.entry(key.to_string()).or_insert(CounterSnapshot {
            value: 0,
            expires_at: now + expiry,
        });
        if counter.expires_at <= now {
            *counter = CounterSnapshot {
                value: 0,
                expires_at: now + expiry,
            };
        }
        counter.value += 1;
        Ok(*counter)
    }

    async fn get_counter(&self, key: &str, now: u64) -> Result<Option<CounterSnapshot>, StoreError> {
        Ok(self.live_counter(key, now))
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.windows.remove(key);
        self.counters.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
