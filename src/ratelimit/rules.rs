//! Route policy table.
//!
//! Built once at startup from the limit strings routes declare. Limit strings
//! are parsed here and never again per request.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::limit::LimitSpec;
use crate::config::LimitsConfig;
use crate::error::{Result, TollgateError};

/// A route as declared by the host, before parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePolicyConfig {
    /// Stable route identifier, typically `"<METHOD> <path template>"`.
    pub route: String,
    /// Optional limit string such as `"3/hour"`.
    #[serde(default)]
    pub rate_limit: Option<String>,
    /// Whether the route refuses anonymous callers.
    #[serde(default)]
    pub requires_auth: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RoutePolicyFile {
    #[serde(default)]
    routes: Vec<RoutePolicyConfig>,
}

/// Parsed admission policy for one route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Route-scope limit. `None` means only the global scope applies.
    pub limit: Option<LimitSpec>,
    pub requires_auth: bool,
}

/// Immutable map from route identifier to policy.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicyTable {
    routes: HashMap<String, RoutePolicy>,
}

impl RoutePolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Fails if `rate_limit` does not parse.
    pub fn register(&mut self, route: &str, rate_limit: Option<&str>, requires_auth: bool) -> Result<()> {
        let limit = rate_limit.map(str::parse::<LimitSpec>).transpose()?;
        debug!(route, limit = ?limit.map(|l| l.to_string()), requires_auth, "Registered route policy");
        self.routes.insert(route.to_string(), RoutePolicy { limit, requires_auth });
        Ok(())
    }

    /// Build a table from declared routes.
    pub fn from_config(routes: &[RoutePolicyConfig]) -> Result<Self> {
        let mut table = Self::new();
        for route in routes {
            table.register(&route.route, route.rate_limit.as_deref(), route.requires_auth)?;
        }
        Ok(table)
    }

    /// Load a table from a YAML string with a top-level `routes:` list.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: RoutePolicyFile = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse route policies: {}", e)))?;
        Self::from_config(&file.routes)
    }

    /// Load a table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading route policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Build the table described by the `limits` configuration section: the
    /// route file first, inline routes on top.
    pub fn from_limits(limits: &LimitsConfig) -> Result<Self> {
        let mut table = match &limits.routes_path {
            Some(path) => Self::from_file(path)?,
            None => Self::new(),
        };
        table.extend(Self::from_config(&limits.routes)?);
        Ok(table)
    }

    /// Merge `other` into this table; routes in `other` win.
    pub fn extend(&mut self, other: RoutePolicyTable) {
        self.routes.extend(other.routes);
    }

    /// Policy for `route`. Unknown routes fall back to global-only, anonymous.
    pub fn policy(&self, route: &str) -> RoutePolicy {
        self.routes.get(route).copied().unwrap_or_default()
    }

    /// Declared route-scope limit, if any.
    pub fn limit(&self, route: &str) -> Option<LimitSpec> {
        self.policy(route).limit
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes sorted by identifier.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RoutePolicy)> {
        let mut routes: Vec<_> = self.routes.iter().map(|(k, v)| (k.as_str(), v)).collect();
        routes.sort_by(|a, b| a.0.cmp(b.0));
        routes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::limit::TimeWindow;

    #[test]
    fn test_parse_route_file() {
        let yaml = r#"
routes:
  - route: POST /register
    rate_limit: 3/hour
  - route: GET /users/@me
    requires_auth: true
  - route: POST /channels/{channel_id}/messages
    rate_limit: 5/second
    requires_auth: true
"#;
        let table = RoutePolicyTable::from_yaml(yaml).unwrap();
        assert_eq!(table.len(), 3);

        let register = table.policy("POST /register");
        assert_eq!(register.limit, Some(LimitSpec::new(3, TimeWindow::Hour)));
        assert!(!register.requires_auth);

        let me = table.policy("GET /users/@me");
        assert_eq!(me.limit, None);
        assert!(me.requires_auth);
    }

    #[test]
    fn test_unknown_route_is_global_only() {
        let table = RoutePolicyTable::new();
        assert_eq!(table.policy("GET /nowhere"), RoutePolicy::default());
        assert!(table.limit("GET /nowhere").is_none());
    }

    #[test]
    fn test_invalid_limit_fails_at_registration() {
        let mut table = RoutePolicyTable::new();
        let err = table.register("POST /register", Some("three per hour"), false);
        assert!(matches!(err, Err(TollgateError::Limit(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_extend_overrides() {
        let mut base = RoutePolicyTable::new();
        base.register("POST /register", Some("3/hour"), false).unwrap();

        let mut overrides = RoutePolicyTable::new();
        overrides.register("POST /register", Some("1/minute"), false).unwrap();
        base.extend(overrides);

        assert_eq!(base.limit("POST /register"), Some(LimitSpec::new(1, TimeWindow::Minute)));
    }

    #[test]
    fn test_inline_routes_override_file() {
        let mut path = std::env::temp_dir();
        path.push(format!("tollgate-routes-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "routes:\n  - route: POST /register\n    rate_limit: 3/hour\n  - route: GET /a\n").unwrap();

        let limits = LimitsConfig {
            routes_path: Some(path.display().to_string()),
            routes: vec![RoutePolicyConfig {
                route: "POST /register".to_string(),
                rate_limit: Some("1 per day".to_string()),
                requires_auth: true,
            }],
            ..LimitsConfig::default()
        };
        let table = RoutePolicyTable::from_limits(&limits).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(table.len(), 2);
        let register = table.policy("POST /register");
        assert_eq!(register.limit, Some(LimitSpec::new(1, TimeWindow::Day)));
        assert!(register.requires_auth);
    }

    #[test]
    fn test_iter_is_sorted() {
        let mut table = RoutePolicyTable::new();
        table.register("b", None, false).unwrap();
        table.register("a", None, false).unwrap();
        let names: Vec<_> = table.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
