//! Rate limiting logic and state management.

mod backend;
mod descriptor;
mod distributed;
mod escalator;
mod limit;
mod limiter;
mod memory;
mod rules;

pub use backend::{connect_store, CounterSnapshot, CounterStore, StoreError, WindowSnapshot};
pub use descriptor::{Scope, Subject, WindowKey};
pub use distributed::RedisStore;
pub use escalator::{AbuseEscalator, Tendency, DEFAULT_THRESHOLD, DEFAULT_WINDOW};
pub use limit::{LimitParseError, LimitSpec, TimeWindow};
pub use limiter::{HitOutcome, WindowRateLimiter, WindowStats, WindowStrategy};
pub use memory::MemoryStore;
pub use rules::{RoutePolicy, RoutePolicyConfig, RoutePolicyTable};
