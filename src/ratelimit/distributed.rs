//! Distributed counter store backed by Redis.
//!
//! Each operation is a single Lua script, so the read-modify-write runs
//! atomically on the server and any number of application processes can
//! share one store without a distributed lock.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, error};
use uuid::Uuid;

use super::backend::{CounterSnapshot, CounterStore, StoreError, WindowSnapshot};

const ACQUIRE_MOVING: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
    redis.call('ZADD', key, now, ARGV[4])
    count = count + 1
    admitted = 1
end
if count > 0 then
    redis.call('PEXPIRE', key, window)
end

local reset_at = now + window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
    reset_at = tonumber(oldest[2]) + window
end
return {admitted, count, reset_at}
"#;

const MOVING_WINDOW: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local floor = '(' .. (now - window)

local count = redis.call('ZCOUNT', key, floor, '+inf')
local reset_at = now + window
local oldest = redis.call('ZRANGEBYSCORE', key, floor, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
if oldest[2] then
    reset_at = tonumber(oldest[2]) + window
end
return {0, count, reset_at}
"#;

const ACQUIRE_FIXED: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local current = tonumber(redis.call('GET', key) or '0')
local admitted = 0
if current < limit then
    current = redis.call('INCR', key)
    if current == 1 then
        redis.call('PEXPIRE', key, window)
    end
    admitted = 1
end

local ttl = redis.call('PTTL', key)
if ttl < 0 then
    ttl = window
end
return {admitted, current, now + ttl}
"#;

const FIXED_WINDOW: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local now = tonumber(ARGV[2])

local current = tonumber(redis.call('GET', key) or '0')
local ttl = redis.call('PTTL', key)
if ttl < 0 then
    ttl = window
end
return {0, current, now + ttl}
"#;

const INCR: &str = r#"
local key = KEYS[1]
local expiry = tonumber(ARGV[1])

local value = redis.call('INCR', key)
if value == 1 then
    redis.call('PEXPIRE', key, expiry)
end
local ttl = redis.call('PTTL', key)
if ttl < 0 then
    redis.call('PEXPIRE', key, expiry)
    ttl = expiry
end
return {value, ttl}
"#;

const GET_COUNTER: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return {0, -2}
end
return {tonumber(value), redis.call('PTTL', KEYS[1])}
"#;

struct Scripts {
    acquire_moving: Script,
    moving_window: Script,
    acquire_fixed: Script,
    fixed_window: Script,
    incr: Script,
    get_counter: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            acquire_moving: Script::new(ACQUIRE_MOVING),
            moving_window: Script::new(MOVING_WINDOW),
            acquire_fixed: Script::new(ACQUIRE_FIXED),
            fixed_window: Script::new(FIXED_WINDOW),
            incr: Script::new(INCR),
            get_counter: Script::new(GET_COUNTER),
        }
    }
}

/// A counter store shared by every process pointed at the same Redis.
pub struct RedisStore {
    manager: ConnectionManager,
    scripts: Scripts,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            error!(error = %e, "Invalid counter store URL");
            StoreError::Unavailable(format!("invalid redis url: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!(error = %e, "Failed to connect to counter store");
            StoreError::from(e)
        })?;

        let store = Self {
            manager,
            scripts: Scripts::load(),
        };
        store.ping().await?;

        debug!("Connected to redis counter store");
        Ok(store)
    }

    fn window_snapshot((admitted, count, reset_at): (i64, i64, i64)) -> WindowSnapshot {
        WindowSnapshot {
            admitted: admitted == 1,
            count: count.max(0) as u64,
            reset_at: reset_at.max(0) as u64,
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn acquire_moving(&self, key: &str, limit: u64, window: u64, now: u64) -> Result<WindowSnapshot, StoreError> {
        let mut conn = self.manager.clone();
        let member = format!("{}-{}", now, Uuid::new_v4().simple());
        let reply: (i64, i64, i64) = self
            .scripts
            .acquire_moving
            .key(key)
            .arg(limit)
            .arg(window)
            .arg(now)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(Self::window_snapshot(reply))
    }

    async fn moving_window(&self, key: &str, window: u64, now: u64) -> Result<WindowSnapshot, StoreError> {
        let mut conn = self.manager.clone();
        let reply: (i64, i64, i64) = self
            .scripts
            .moving_window
            .key(key)
            .arg(window)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(Self::window_snapshot(reply))
    }

    async fn acquire_fixed(&self, key: &str, limit: u64, window: u64, now: u64) -> Result<WindowSnapshot, StoreError> {
        let mut conn = self.manager.clone();
        let reply: (i64, i64, i64) = self
            .scripts
            .acquire_fixed
            .key(key)
            .arg(limit)
            .arg(window)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(Self::window_snapshot(reply))
    }

    async fn fixed_window(&self, key: &str, window: u64, now: u64) -> Result<WindowSnapshot, StoreError> {
        let mut conn = self.manager.clone();
        let reply: (i64, i64, i64) = self
            .scripts
            .fixed_window
            .key(key)
            .arg(window)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(Self::window_snapshot(reply))
    }

    async fn incr(&self, key: &str, expiry: u64, now: u64) -> Result<CounterSnapshot, StoreError> {
        let mut conn = self.manager.clone();
        let (value, ttl): (i64, i64) = self
            .scripts
            .incr
            .key(key)
            .arg(expiry)
            .invoke_async(&mut conn)
            .await?;
        Ok(CounterSnapshot {
            value: value.max(0) as u64,
            expires_at: now + ttl.max(0) as u64,
        })
    }

    async fn get_counter(&self, key: &str, now: u64) -> Result<Option<CounterSnapshot>, StoreError> {
        let mut conn = self.manager.clone();
        let (value, ttl): (i64, i64) = self
            .scripts
            .get_counter
            .key(key)
            .invoke_async(&mut conn)
            .await?;
        if ttl == -2 {
            return Ok(None);
        }
        Ok(Some(CounterSnapshot {
            value: value.max(0) as u64,
            expires_at: now + ttl.max(0) as u64,
        }))
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(StoreError::Protocol(format!("unexpected PING reply {:?}", pong)));
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
