//! Parsed rate limit policies.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Time window for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }

    /// Lowercase singular name, as used in limit strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Second => "second",
            TimeWindow::Minute => "minute",
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
        }
    }

    fn parse(unit: &str) -> Option<Self> {
        let unit = unit.trim().to_ascii_lowercase();
        let unit = unit.strip_suffix('s').unwrap_or(&unit);
        match unit {
            "second" | "sec" => Some(TimeWindow::Second),
            "minute" | "min" => Some(TimeWindow::Minute),
            "hour" => Some(TimeWindow::Hour),
            "day" => Some(TimeWindow::Day),
            _ => None,
        }
    }
}

/// Errors raised while parsing a limit string such as `"3/hour"`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LimitParseError {
    #[error("expected '<count>/<period>', got {0:?}")]
    Format(String),
    #[error("invalid count in {0:?}")]
    Count(String),
    #[error("unknown period in {0:?}")]
    Period(String),
}

/// An immutable rate policy: `count` hits per `multiple` x `window`.
///
/// Parsed once when routes are registered and shared by reference afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LimitSpec {
    count: u64,
    multiple: u32,
    window: TimeWindow,
}

impl LimitSpec {
    /// Create a limit of `count` hits per single `window`.
    pub const fn new(count: u64, window: TimeWindow) -> Self {
        Self {
            count,
            multiple: 1,
            window,
        }
    }

    /// Create a limit of `count` hits per `multiple` windows, e.g. 10 per 5 minutes.
    pub fn with_multiple(count: u64, multiple: u32, window: TimeWindow) -> Self {
        Self {
            count,
            multiple: multiple.max(1),
            window,
        }
    }

    /// Maximum hits admitted within one period.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The base time unit.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Full length of the rolling period.
    pub fn period(&self) -> Duration {
        self.window.duration() * self.multiple
    }

    /// Period length in milliseconds, the unit the counter stores work in.
    pub fn period_millis(&self) -> u64 {
        self.period().as_millis() as u64
    }
}

impl FromStr for LimitSpec {
    type Err = LimitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (count, period) = raw
            .split_once('/')
            .or_else(|| raw.split_once(" per "))
            .ok_or_else(|| LimitParseError::Format(s.to_string()))?;

        let count: u64 = count
            .trim()
            .parse()
            .map_err(|_| LimitParseError::Count(s.to_string()))?;

        // "10/5 minutes" carries an optional multiplier before the unit.
        let period = period.trim();
        let (multiple, unit) = match period.split_once(char::is_whitespace) {
            Some((n, unit)) if n.chars().all(|c| c.is_ascii_digit()) => {
                let n: u32 = n.parse().map_err(|_| LimitParseError::Period(s.to_string()))?;
                if n == 0 {
                    return Err(LimitParseError::Period(s.to_string()));
                }
                (n, unit)
            }
            _ => (1, period),
        };

        let window = TimeWindow::parse(unit).ok_or_else(|| LimitParseError::Period(s.to_string()))?;
        Ok(LimitSpec::with_multiple(count, multiple, window))
    }
}

impl fmt::Display for LimitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.multiple == 1 {
            write!(f, "{}/{}", self.count, self.window.as_str())
        } else {
            write!(f, "{}/{} {}s", self.count, self.multiple, self.window.as_str())
        }
    }
}
