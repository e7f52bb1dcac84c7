//! Configuration management for Tollgate.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ratelimit::{RoutePolicyConfig, WindowStrategy};

/// Main configuration for the admission layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Abuse escalation configuration
    #[serde(default)]
    pub abuse: AbuseConfig,

    /// Token and identity configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL. Absent means an in-process store.
    #[serde(default)]
    pub url: Option<String>,

    /// Prefix for every key written to the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expired-entry sweep interval for the in-process store, 0 to disable
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_key_prefix() -> String {
    "tollgate".to_string()
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-address limit shared by every route
    #[serde(default = "default_global_limit")]
    pub global: String,

    /// Counting algorithm
    #[serde(default)]
    pub strategy: WindowStrategy,

    /// Path to a YAML route policy file
    #[serde(default)]
    pub routes_path: Option<String>,

    /// Routes declared inline; these override the file
    #[serde(default)]
    pub routes: Vec<RoutePolicyConfig>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global: default_global_limit(),
            strategy: WindowStrategy::default(),
            routes_path: None,
            routes: Vec::new(),
        }
    }
}

fn default_global_limit() -> String {
    "50/second".to_string()
}

/// Abuse escalation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseConfig {
    /// Global-limit rejections per window before an address is banned
    #[serde(default = "default_abuse_threshold")]
    pub threshold: u64,

    /// Length of the tendency window in seconds
    #[serde(default = "default_abuse_window")]
    pub window_secs: u64,

    /// Reject banned addresses before any counting, not only when they hit
    /// the global limit again
    #[serde(default)]
    pub block_banned: bool,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            threshold: default_abuse_threshold(),
            window_secs: default_abuse_window(),
            block_banned: false,
        }
    }
}

fn default_abuse_threshold() -> u64 {
    60
}

fn default_abuse_window() -> u64 {
    3600
}

/// Token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Salt mixed into the token signing key
    #[serde(default = "default_salt")]
    pub salt: String,

    /// Maximum token age in seconds. Absent disables the check.
    #[serde(default)]
    pub max_age_secs: Option<u64>,

    /// Answer 401 when a presented token is invalid, even on routes that
    /// allow anonymous callers. Off by default: an invalid token on such a
    /// route is treated as no identity.
    #[serde(default)]
    pub reject_invalid_credentials: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            salt: default_salt(),
            max_age_secs: None,
            reject_invalid_credentials: false,
        }
    }
}

fn default_salt() -> String {
    "tollgate.token".to_string()
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TollgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot describe a working admission layer.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.abuse.threshold == 0 {
            return Err(crate::error::TollgateError::Config(
                "abuse.threshold must be at least 1".to_string(),
            ));
        }
        if self.abuse.window_secs == 0 {
            return Err(crate::error::TollgateError::Config(
                "abuse.window_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from an optional YAML file, then apply
    /// `TOLLGATE__SECTION__FIELD` environment overrides.
    ///
    /// `REDIS_URI` is honoured when no store URL is configured otherwise.
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        builder = builder.add_source(Environment::with_prefix("TOLLGATE").separator("__"));

        let mut config: TollgateConfig = builder.build()?.try_deserialize()?;
        if config.store.url.is_none() {
            config.store.url = std::env::var("REDIS_URI").ok().filter(|v| !v.is_empty());
        }
        config.validate()?;
        Ok(config)
    }
}
