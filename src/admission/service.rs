//! Per-request admission: identity resolution, global and route scopes,
//! abuse escalation and response headers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use super::response::{seconds_until, RateLimitHeaders, Rejection};
use crate::clock::Clock;
use crate::config::TollgateConfig;
use crate::error::Result;
use crate::ratelimit::{
    AbuseEscalator, CounterStore, LimitSpec, RoutePolicy, RoutePolicyTable, StoreError, Subject, Tendency,
    WindowKey, WindowRateLimiter,
};
use crate::token::{IdentityStore, TokenCodec};

/// What the host knows about an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    /// Client network address.
    pub address: &'a str,
    /// Raw `Authorization` header value, if present.
    pub authorization: Option<&'a str>,
    /// Stable route identifier, e.g. `"POST /register"`.
    pub route: &'a str,
}

impl<'a> AdmissionRequest<'a> {
    pub fn new(address: &'a str, route: &'a str) -> Self {
        Self {
            address,
            authorization: None,
            route,
        }
    }

    pub fn with_authorization(mut self, authorization: Option<&'a str>) -> Self {
        self.authorization = authorization;
        self
    }
}

/// A request that passed admission.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    /// Verified principal identifier, if the request was authenticated.
    pub identity: Option<String>,
    pub address: String,
    pub route: String,
    route_scope: Option<(LimitSpec, WindowKey)>,
}

impl Admitted {
    /// The limit and key of the route scope, if the route declares one.
    pub fn route_scope(&self) -> Option<&(LimitSpec, WindowKey)> {
        self.route_scope.as_ref()
    }
}

/// Behaviour switches for the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionSettings {
    /// A presented but invalid token is a 401 even on anonymous routes.
    /// When unset such a token counts as no identity there.
    pub reject_invalid_credentials: bool,
    /// Banned addresses are refused before any counting.
    pub block_banned: bool,
}

/// Decides whether each request may proceed.
///
/// Shared by every request-handling task. Each request touches the global
/// scope first and the route scope second; hits are never rolled back, so a
/// request that fails later still consumes the quota it used.
pub struct AdmissionController {
    codec: TokenCodec,
    identities: Arc<dyn IdentityStore>,
    limiter: WindowRateLimiter,
    escalator: AbuseEscalator,
    policies: RoutePolicyTable,
    global_limit: LimitSpec,
    settings: AdmissionSettings,
}

impl AdmissionController {
    pub fn new(
        codec: TokenCodec,
        identities: Arc<dyn IdentityStore>,
        limiter: WindowRateLimiter,
        escalator: AbuseEscalator,
        policies: RoutePolicyTable,
        global_limit: LimitSpec,
        settings: AdmissionSettings,
    ) -> Self {
        Self {
            codec,
            identities,
            limiter,
            escalator,
            policies,
            global_limit,
            settings,
        }
    }

    /// Assemble a controller from configuration around an existing store.
    pub fn from_config(
        config: &TollgateConfig,
        store: Arc<dyn CounterStore>,
        identities: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let global_limit: LimitSpec = config.limits.global.parse()?;

        let policies = RoutePolicyTable::from_limits(&config.limits)?;

        let prefix = &config.store.key_prefix;
        let codec = TokenCodec::new(config.auth.salt.clone(), clock.clone())
            .with_max_age(config.auth.max_age_secs.map(Duration::from_secs));
        let limiter = WindowRateLimiter::new(store.clone(), clock.clone(), config.limits.strategy, prefix.clone());
        let escalator = AbuseEscalator::new(
            store.clone(),
            clock,
            config.abuse.threshold,
            Duration::from_secs(config.abuse.window_secs),
            prefix.clone(),
        );

        info!(
            backend = store.kind(),
            global = %global_limit,
            strategy = ?config.limits.strategy,
            routes = policies.len(),
            abuse_threshold = config.abuse.threshold,
            "Admission controller configured"
        );

        Ok(Self::new(
            codec,
            identities,
            limiter,
            escalator,
            policies,
            global_limit,
            AdmissionSettings {
                reject_invalid_credentials: config.auth.reject_invalid_credentials,
                block_banned: config.abuse.block_banned,
            },
        ))
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn policies(&self) -> &RoutePolicyTable {
        &self.policies
    }

    pub fn global_limit(&self) -> LimitSpec {
        self.global_limit
    }

    pub fn limiter(&self) -> &WindowRateLimiter {
        &self.limiter
    }

    pub fn escalator(&self) -> &AbuseEscalator {
        &self.escalator
    }

    fn now(&self) -> u64 {
        self.limiter.clock().now_millis()
    }

    /// Decide whether `request` may reach its handler.
    #[instrument(
        skip(self, request),
        fields(route = %request.route, address = %request.address)
    )]
    pub async fn admit(&self, request: &AdmissionRequest<'_>) -> std::result::Result<Admitted, Rejection> {
        let policy = self.policies.policy(request.route);
        let identity = self.resolve_identity(request, &policy).await?;

        if self.settings.block_banned {
            let tendency = self.escalator.status(request.address).await.map_err(store_failure)?;
            if tendency.banned {
                debug!("Refusing banned address");
                return Err(self.banned(&tendency));
            }
        }

        let global = self
            .limiter
            .hit(&self.global_limit, &WindowKey::global(request.address))
            .await
            .map_err(store_failure)?;

        if !global.allowed {
            let tendency = self
                .escalator
                .record_trigger(request.address)
                .await
                .map_err(store_failure)?;
            if !tendency.still_allowed() {
                return Err(self.banned(&tendency));
            }
            debug!(reset_at = global.reset_at, "Global rate limit exceeded");
            return Err(Rejection::RateLimited {
                retry_after: seconds_until(global.reset_at, self.now()),
                reset_at: global.reset_at,
                global: true,
            });
        }

        let route_scope = match policy.limit {
            Some(limit) => {
                let subject = match &identity {
                    Some(id) => Subject::Identity(id.clone()),
                    None => Subject::Address(request.address.to_string()),
                };
                let key = WindowKey::route(subject, request.route);
                let outcome = self.limiter.hit(&limit, &key).await.map_err(store_failure)?;
                if !outcome.allowed {
                    debug!(key = %key, reset_at = outcome.reset_at, "Route rate limit exceeded");
                    return Err(Rejection::RateLimited {
                        retry_after: seconds_until(outcome.reset_at, self.now()),
                        reset_at: outcome.reset_at,
                        global: false,
                    });
                }
                Some((limit, key))
            }
            None => None,
        };

        Ok(Admitted {
            identity,
            address: request.address.to_string(),
            route: request.route.to_string(),
            route_scope,
        })
    }

    /// Quota headers for an admitted request, computed after its handler ran.
    ///
    /// Reports the route scope when the route declares one, the global scope
    /// otherwise. A banned address sees the ban expiry as its reset time.
    pub async fn response_headers(&self, admitted: &Admitted) -> std::result::Result<RateLimitHeaders, Rejection> {
        let (limit, stats) = match &admitted.route_scope {
            Some((limit, key)) => (*limit, self.limiter.get_window_stats(limit, key).await),
            None => (
                self.global_limit,
                self.limiter
                    .get_window_stats(&self.global_limit, &WindowKey::global(&admitted.address))
                    .await,
            ),
        };
        let stats = stats.map_err(store_failure)?;

        let mut reset = stats.reset_at;
        let tendency = self.escalator.status(&admitted.address).await.map_err(store_failure)?;
        if tendency.banned && tendency.reset_at > reset {
            reset = tendency.reset_at;
        }

        Ok(RateLimitHeaders {
            limit: limit.count(),
            remaining: stats.remaining,
            reset,
            reset_after: seconds_until(reset, self.now()),
        })
    }

    /// Admit `request`, run `handler`, then compute the response headers.
    pub async fn guard<F, T>(
        &self,
        request: &AdmissionRequest<'_>,
        handler: F,
    ) -> std::result::Result<(T, RateLimitHeaders), Rejection>
    where
        F: Future<Output = T>,
    {
        let admitted = self.admit(request).await?;
        let output = handler.await;
        let headers = self.response_headers(&admitted).await?;
        Ok((output, headers))
    }

    async fn resolve_identity(
        &self,
        request: &AdmissionRequest<'_>,
        policy: &RoutePolicy,
    ) -> std::result::Result<Option<String>, Rejection> {
        let token = request.authorization.map(bearer_token).filter(|value| !value.is_empty());

        let Some(token) = token else {
            if policy.requires_auth {
                debug!("Missing authorization on authenticated route");
                return Err(Rejection::AuthenticationRequired {
                    reason: "missing authorization".to_string(),
                });
            }
            return Ok(None);
        };

        match self.authenticate(token).await {
            Ok(id) => Ok(Some(id)),
            Err(reason) if policy.requires_auth || self.settings.reject_invalid_credentials => {
                debug!(reason, "Rejecting invalid authorization");
                Err(Rejection::AuthenticationRequired {
                    reason: reason.to_string(),
                })
            }
            Err(reason) => {
                debug!(reason, "Ignoring invalid authorization on anonymous route");
                Ok(None)
            }
        }
    }

    async fn authenticate(&self, token: &str) -> std::result::Result<String, &'static str> {
        let id = self.codec.identifier_of(token).map_err(|_| "malformed token")?;
        let identity = self.identities.find(&id).await.ok_or("unknown identity")?;
        if !self.codec.verify(token, &identity.secret) {
            return Err("invalid signature");
        }
        Ok(identity.id)
    }

    fn banned(&self, tendency: &Tendency) -> Rejection {
        info!(triggers = tendency.count, reset_at = tendency.reset_at, "Banned address rejected");
        Rejection::Banned {
            retry_after: seconds_until(tendency.reset_at, self.now()),
            reset_at: tendency.reset_at,
        }
    }
}

/// Strip an optional `Bearer` scheme; the scheme name is case-insensitive.
fn bearer_token(value: &str) -> &str {
    let value = value.trim();
    match value.split_once(char::is_whitespace) {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ => value,
    }
}

fn store_failure(err: StoreError) -> Rejection {
    error!(error = %err, "Counter store failure, rejecting request");
    Rejection::StoreUnavailable {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::{CounterSnapshot, MemoryStore, RoutePolicyConfig, TimeWindow, WindowSnapshot};
    use crate::token::{Identity, StaticIdentities};
    use async_trait::async_trait;

    const START: u64 = 1_700_000_000_000;

    struct Harness {
        controller: AdmissionController,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        identities: Arc<StaticIdentities>,
    }

    fn route(route: &str, rate_limit: Option<&str>, requires_auth: bool) -> RoutePolicyConfig {
        RoutePolicyConfig {
            route: route.to_string(),
            rate_limit: rate_limit.map(str::to_string),
            requires_auth,
        }
    }

    fn test_config() -> TollgateConfig {
        let mut config = TollgateConfig::default();
        config.limits.routes = vec![
            route("POST /register", Some("3/hour"), false),
            route("GET /users/@me", None, true),
            route("POST /channels/{channel_id}/messages", Some("2/minute"), true),
        ];
        config
    }

    fn harness(config: TollgateConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let identities = Arc::new(StaticIdentities::new());
        identities.insert(Identity::new("1001", "first-secret"));
        identities.insert(Identity::new("1002", "second-secret"));

        let controller = AdmissionController::from_config(&config, store.clone(), identities.clone(), clock.clone())
            .unwrap();
        Harness {
            controller,
            store,
            clock,
            identities,
        }
    }

    #[tokio::test]
    async fn test_register_route_scenario() {
        let h = harness(test_config());
        let request = AdmissionRequest::new("1.2.3.4", "POST /register");

        for expected_remaining in [2, 1, 0] {
            let admitted = h.controller.admit(&request).await.unwrap();
            let headers = h.controller.response_headers(&admitted).await.unwrap();
            assert_eq!(headers.remaining, expected_remaining);
            assert_eq!(headers.limit, 3);
            assert_eq!(headers.reset, START + 3_600_000);
            h.clock.advance(Duration::from_secs(1));
        }

        let rejection = h.controller.admit(&request).await.unwrap_err();
        assert_eq!(rejection.status_code(), 429);
        match rejection {
            Rejection::RateLimited { retry_after, global, .. } => {
                assert!(!global);
                assert_eq!(retry_after, 3597.0);
            }
            other => panic!("unexpected rejection {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_auth_rejected_without_counting() {
        let h = harness(test_config());
        let request = AdmissionRequest::new("1.2.3.4", "GET /users/@me");

        let rejection = h.controller.admit(&request).await.unwrap_err();
        assert_eq!(rejection.status_code(), 401);
        assert!(matches!(rejection, Rejection::AuthenticationRequired { .. }));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_authenticated_request_keyed_by_identity() {
        let h = harness(test_config());
        let token = h.controller.codec().issue("1001", "first-secret");
        let route = "POST /channels/{channel_id}/messages";

        let from_home = AdmissionRequest::new("10.0.0.1", route).with_authorization(Some(&token));
        let admitted = h.controller.admit(&from_home).await.unwrap();
        assert_eq!(admitted.identity.as_deref(), Some("1001"));

        // Same principal from a different address shares the route quota.
        let bearer = format!("Bearer {}", token);
        let from_phone = AdmissionRequest::new("10.0.0.2", route).with_authorization(Some(&bearer));
        h.controller.admit(&from_phone).await.unwrap();
        let rejection = h.controller.admit(&from_phone).await.unwrap_err();
        assert!(matches!(rejection, Rejection::RateLimited { global: false, .. }));

        // Another principal is unaffected.
        let other = h.controller.codec().issue("1002", "second-secret");
        let request = AdmissionRequest::new("10.0.0.2", route).with_authorization(Some(&other));
        assert!(h.controller.admit(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_token_is_anonymous_on_open_routes() {
        let h = harness(test_config());
        let forged = h.controller.codec().issue("1001", "wrong-secret");

        for token in ["not-a-token", forged.as_str()] {
            let request = AdmissionRequest::new("1.2.3.4", "POST /register").with_authorization(Some(token));
            let admitted = h.controller.admit(&request).await.unwrap();
            assert_eq!(admitted.identity, None);
            // Charged to the address, not to the identity the token names.
            let (_, key) = admitted.route_scope().unwrap();
            assert_eq!(key.subject, Subject::Address("1.2.3.4".to_string()));
        }

        // Authenticated routes still refuse it.
        let me = AdmissionRequest::new("1.2.3.4", "GET /users/@me").with_authorization(Some(&forged));
        assert_eq!(h.controller.admit(&me).await.unwrap_err().status_code(), 401);
    }

    #[tokio::test]
    async fn test_strict_invalid_token_handling() {
        let mut config = test_config();
        config.auth.reject_invalid_credentials = true;
        let h = harness(config);

        let forged = h.controller.codec().issue("1001", "wrong-secret");
        let request = AdmissionRequest::new("1.2.3.4", "POST /register").with_authorization(Some(&forged));
        assert_eq!(h.controller.admit(&request).await.unwrap_err().status_code(), 401);

        let garbage = AdmissionRequest::new("1.2.3.4", "POST /register").with_authorization(Some("garbage"));
        assert_eq!(h.controller.admit(&garbage).await.unwrap_err().status_code(), 401);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_bearer_scheme_is_case_insensitive() {
        let h = harness(test_config());
        let token = h.controller.codec().issue("1001", "first-secret");

        for header in [
            format!("Bearer {}", token),
            format!("bearer {}", token),
            format!("BEARER  {}", token),
            token.clone(),
        ] {
            let request = AdmissionRequest::new("1.2.3.4", "GET /users/@me").with_authorization(Some(&header));
            let admitted = h.controller.admit(&request).await.unwrap();
            assert_eq!(admitted.identity.as_deref(), Some("1001"));
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ban_rejection_logs_at_info() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tokio_test::block_on(async {
                let mut config = test_config();
                config.limits.global = "1/second".to_string();
                config.abuse.threshold = 1;
                let h = harness(config);
                let request = AdmissionRequest::new("9.9.9.9", "GET /gateway");

                h.controller.admit(&request).await.unwrap();
                assert_eq!(h.controller.admit(&request).await.unwrap_err().status_code(), 420);
            })
        });

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("Banned address rejected"))
            .unwrap();
        assert!(line.contains("INFO"), "{}", line);
        assert!(!output.contains("WARN"));
    }

    #[test]
    fn test_zero_abuse_threshold_is_refused() {
        let mut config = test_config();
        config.abuse.threshold = 0;
        let result = AdmissionController::from_config(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(StaticIdentities::new()),
            Arc::new(ManualClock::new(START)),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_secret_rotation_revokes_tokens() {
        let h = harness(test_config());
        let token = h.controller.codec().issue("1001", "first-secret");
        let request = AdmissionRequest::new("1.2.3.4", "GET /users/@me").with_authorization(Some(&token));
        assert!(h.controller.admit(&request).await.is_ok());

        h.identities.rotate_secret("1001", "rotated");
        assert_eq!(h.controller.admit(&request).await.unwrap_err().status_code(), 401);
    }

    #[tokio::test]
    async fn test_global_limit_is_shared_across_routes() {
        let mut config = test_config();
        config.limits.global = "2/second".to_string();
        let h = harness(config);

        h.controller.admit(&AdmissionRequest::new("5.5.5.5", "GET /a")).await.unwrap();
        h.controller.admit(&AdmissionRequest::new("5.5.5.5", "GET /b")).await.unwrap();
        let rejection = h
            .controller
            .admit(&AdmissionRequest::new("5.5.5.5", "GET /c"))
            .await
            .unwrap_err();
        match rejection {
            Rejection::RateLimited { global, retry_after, .. } => {
                assert!(global);
                assert_eq!(retry_after, 1.0);
            }
            other => panic!("unexpected rejection {:?}", other),
        }

        // Another address is unaffected.
        assert!(h.controller.admit(&AdmissionRequest::new("6.6.6.6", "GET /a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_route_rejection_does_not_escalate() {
        let mut config = test_config();
        config.abuse.threshold = 1;
        let h = harness(config);
        let request = AdmissionRequest::new("1.2.3.4", "POST /register");

        for _ in 0..3 {
            h.controller.admit(&request).await.unwrap();
        }
        for _ in 0..5 {
            let rejection = h.controller.admit(&request).await.unwrap_err();
            assert!(matches!(rejection, Rejection::RateLimited { global: false, .. }));
        }
        assert_eq!(h.controller.escalator().status("1.2.3.4").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_repeated_global_rejections_escalate_to_ban() {
        let mut config = test_config();
        config.limits.global = "1/second".to_string();
        config.abuse.threshold = 3;
        let h = harness(config);
        let request = AdmissionRequest::new("9.9.9.9", "GET /gateway");

        h.controller.admit(&request).await.unwrap();
        for _ in 0..2 {
            let rejection = h.controller.admit(&request).await.unwrap_err();
            assert_eq!(rejection.status_code(), 429);
        }
        let rejection = h.controller.admit(&request).await.unwrap_err();
        assert_eq!(rejection.status_code(), 420);
        assert_eq!(rejection, Rejection::Banned {
            retry_after: 3600.0,
            reset_at: START + 3_600_000,
        });

        // Once the global window passes the request succeeds, but the headers
        // point at the ban expiry.
        h.clock.advance(Duration::from_secs(1));
        let admitted = h.controller.admit(&request).await.unwrap();
        let headers = h.controller.response_headers(&admitted).await.unwrap();
        assert_eq!(headers.reset, START + 3_600_000);
        assert_eq!(headers.reset_after, 3599.0);

        // After the tendency window the address is clean again.
        h.clock.set(START + 61 * 60 * 1000);
        let admitted = h.controller.admit(&request).await.unwrap();
        let headers = h.controller.response_headers(&admitted).await.unwrap();
        assert_eq!(headers.reset, START + 61 * 60 * 1000 + 1000);
    }

    #[tokio::test]
    async fn test_block_banned_refuses_before_counting() {
        let mut config = test_config();
        config.limits.global = "1/second".to_string();
        config.abuse.threshold = 1;
        config.abuse.block_banned = true;
        let h = harness(config);
        let request = AdmissionRequest::new("9.9.9.9", "POST /register");

        h.controller.admit(&request).await.unwrap();
        assert_eq!(h.controller.admit(&request).await.unwrap_err().status_code(), 420);

        h.clock.advance(Duration::from_secs(5));
        assert_eq!(h.controller.admit(&request).await.unwrap_err().status_code(), 420);

        // The refused requests consumed no route quota.
        let limit = LimitSpec::new(3, TimeWindow::Hour);
        let key = WindowKey::route(Subject::Address("9.9.9.9".to_string()), "POST /register");
        let stats = h.controller.limiter().get_window_stats(&limit, &key).await.unwrap();
        assert_eq!(stats.remaining, 2);
    }

    #[tokio::test]
    async fn test_guard_runs_handler_and_stamps_headers() {
        let h = harness(test_config());
        let request = AdmissionRequest::new("1.2.3.4", "GET /gateway");

        let (body, headers) = h.controller.guard(&request, async { "ok" }).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(headers.limit, 50);
        assert_eq!(headers.remaining, 49);
    }

    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn acquire_moving(&self, _: &str, _: u64, _: u64, _: u64) -> std::result::Result<WindowSnapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn moving_window(&self, _: &str, _: u64, _: u64) -> std::result::Result<WindowSnapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn acquire_fixed(&self, _: &str, _: u64, _: u64, _: u64) -> std::result::Result<WindowSnapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn fixed_window(&self, _: &str, _: u64, _: u64) -> std::result::Result<WindowSnapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn incr(&self, _: &str, _: u64, _: u64) -> std::result::Result<CounterSnapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn get_counter(&self, _: &str, _: u64) -> std::result::Result<Option<CounterSnapshot>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn clear(&self, _: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn kind(&self) -> &'static str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let controller = AdmissionController::from_config(
            &test_config(),
            Arc::new(UnreachableStore),
            Arc::new(StaticIdentities::new()),
            Arc::new(ManualClock::new(START)),
        )
        .unwrap();

        let rejection = controller
            .admit(&AdmissionRequest::new("1.2.3.4", "POST /register"))
            .await
            .unwrap_err();
        assert_eq!(rejection.status_code(), 500);
        assert!(!rejection.is_rate_limited());
    }
}
