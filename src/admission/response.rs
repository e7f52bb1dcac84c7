//! Admission outcomes handed back to the host transport.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RESET_AFTER: &str = "X-RateLimit-Reset-After";

/// Why a request was not admitted.
///
/// These are expected, user-visible outcomes rather than faults; the host
/// formats them with [`Rejection::status_code`] and [`Rejection::body`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// A quota is exhausted.
    #[error("rate limited (global: {global}), retry after {retry_after:.3}s")]
    RateLimited {
        /// Seconds until the window admits another hit.
        retry_after: f64,
        /// Epoch millisecond at which the window admits another hit.
        reset_at: u64,
        /// Whether the global per-address scope was the one exhausted.
        global: bool,
    },

    /// The address keeps exhausting the global limit and is temporarily banned.
    #[error("address banned, retry after {retry_after:.3}s")]
    Banned { retry_after: f64, reset_at: u64 },

    /// Credentials are missing or invalid on a route that needs them.
    #[error("authentication required: {reason}")]
    AuthenticationRequired { reason: String },

    /// The counter store could not be reached; the request fails closed.
    #[error("counter store unavailable: {message}")]
    StoreUnavailable { message: String },
}

impl Rejection {
    /// HTTP status the host should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Rejection::RateLimited { .. } => 429,
            Rejection::Banned { .. } => 420,
            Rejection::AuthenticationRequired { .. } => 401,
            Rejection::StoreUnavailable { .. } => 500,
        }
    }

    /// JSON body the host should answer with.
    pub fn body(&self) -> Value {
        match self {
            Rejection::RateLimited { retry_after, global, .. } => json!({
                "retry_after": retry_after,
                "global": global,
            }),
            Rejection::Banned { retry_after, .. } => json!({
                "code": 420,
                "message": "This IP has been temporarily banned for excessively abusing rate limits",
                "retry_after": retry_after,
            }),
            Rejection::AuthenticationRequired { .. } => json!({
                "code": 401,
                "message": "Invalid Authentication",
            }),
            Rejection::StoreUnavailable { .. } => json!({
                "code": 500,
                "message": "Internal Server Error",
            }),
        }
    }

    /// Headers to attach to the rejection, if any.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Rejection::RateLimited { retry_after, reset_at, .. } | Rejection::Banned { retry_after, reset_at } => vec![
                (HEADER_REMAINING, "0".to_string()),
                (HEADER_RESET, format_epoch(*reset_at)),
                (HEADER_RESET_AFTER, format!("{:.3}", retry_after)),
            ],
            _ => Vec::new(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Rejection::RateLimited { .. } | Rejection::Banned { .. })
    }
}

/// Quota headers for a successfully admitted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitHeaders {
    /// Configured amount of the most specific applicable scope.
    pub limit: u64,
    pub remaining: u64,
    /// Epoch millisecond at which the window resets.
    pub reset: u64,
    /// Seconds until `reset`.
    pub reset_after: f64,
}

impl RateLimitHeaders {
    /// Header name/value pairs, names exactly as clients expect them.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, format_epoch(self.reset)),
            (HEADER_RESET_AFTER, format!("{:.3}", self.reset_after)),
        ]
    }
}

/// Epoch milliseconds rendered as seconds with millisecond precision.
fn format_epoch(millis: u64) -> String {
    format!("{}.{:03}", millis / 1000, millis % 1000)
}

/// Seconds from `now` until `at`, never negative.
pub(crate) fn seconds_until(at: u64, now: u64) -> f64 {
    at.saturating_sub(now) as f64 / 1000.0
}
