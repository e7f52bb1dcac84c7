//! Counter store trait for abstracting in-process and distributed backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::distributed::RedisStore;
use super::memory::MemoryStore;
use crate::clock::Clock;
use crate::config::StoreConfig;

/// Errors surfaced by a counter store.
///
/// Every variant is fatal to the request being admitted: the admission layer
/// fails closed rather than counting somewhere else.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected counter store reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Protocol(err.to_string())
        }
    }
}

/// State of a window entry after an acquire or a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Whether this call recorded a hit. Always `false` for reads.
    pub admitted: bool,
    /// Hits currently counted in the window.
    pub count: u64,
    /// Epoch millisecond at which the window next admits a hit.
    pub reset_at: u64,
}

/// A plain expiring counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub value: u64,
    /// Epoch millisecond at which the counter disappears.
    pub expires_at: u64,
}

/// Trait for counter store implementations.
///
/// Each method is one atomic read-modify-write against the backend. Callers
/// pass `now` in epoch milliseconds so that every process sharing a store
/// agrees on what "now" means for a given decision.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Moving window: drop hits older than `window`, then record one at `now`
    /// if fewer than `limit` remain.
    async fn acquire_moving(&self, key: &str, limit: u64, window: u64, now: u64) -> Result<WindowSnapshot, StoreError>;

    /// Moving window, read only.
    async fn moving_window(&self, key: &str, window: u64, now: u64) -> Result<WindowSnapshot, StoreError>;

    /// Fixed window: increment the bucket unless it already holds `limit` hits.
    /// The bucket expires `window` ms after its first hit.
    async fn acquire_fixed(&self, key: &str, limit: u64, window: u64, now: u64) -> Result<WindowSnapshot, StoreError>;

    /// Fixed window, read only.
    async fn fixed_window(&self, key: &str, window: u64, now: u64) -> Result<WindowSnapshot, StoreError>;

    /// Unbounded increment. Expiry is set only when the counter is created.
    async fn incr(&self, key: &str, expiry: u64, now: u64) -> Result<CounterSnapshot, StoreError>;

    /// Read a counter created by [`CounterStore::incr`].
    async fn get_counter(&self, key: &str, now: u64) -> Result<Option<CounterSnapshot>, StoreError>;

    /// Remove whatever is stored under `key`.
    async fn clear(&self, key: &str) -> Result<(), StoreError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn kind(&self) -> &'static str;
}

/// Build the store selected by configuration: Redis when a URL is given,
/// otherwise the in-process map with a background expiry sweep.
///
/// A Redis connection failure is returned to the caller; there is no
/// fallback to process-local counting.
pub async fn connect_store(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn CounterStore>, StoreError> {
    match config.url.as_deref() {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            info!(backend = "redis", "Counter store connected");
            Ok(Arc::new(store))
        }
        None => {
            info!(backend = "memory", "Using in-process counter store");
            let store = Arc::new(MemoryStore::new());
            if config.cleanup_interval_secs > 0 {
                store
                    .clone()
                    .spawn_cleanup(Duration::from_secs(config.cleanup_interval_secs), clock);
            }
            Ok(store)
        }
    }
}
