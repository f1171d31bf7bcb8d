//! Shared state for the order API and the notification gateway.

use crate::registry::{ConnectionRegistry, DEFAULT_OUTBOUND_CAPACITY};
use async_trait::async_trait;
use axum::extract::FromRef;
use courier_core::identity::TokenValidator;
use courier_core::service::OrderService;
use courier_runtime::HealthCheck;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// A dependency whose state feeds the readiness probe.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check the dependency now.
    async fn check(&self) -> HealthCheck;
}

/// Probes consulted by `GET /ready`.
#[derive(Clone, Default)]
pub struct HealthProbes(Arc<Vec<Arc<dyn HealthProbe>>>);

impl HealthProbes {
    /// Wrap a set of probes.
    #[must_use]
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        Self(Arc::new(probes))
    }

    /// Run every probe.
    pub async fn run(&self) -> Vec<HealthCheck> {
        let checks = self.0.iter().map(|probe| probe.check());
        futures::future::join_all(checks).await
    }
}

/// State of the order service router.
#[derive(Clone)]
pub struct AppState {
    /// The only writer of order state.
    pub orders: OrderService,
    /// Readiness probes.
    pub probes: HealthProbes,
}

impl AppState {
    /// State with no readiness probes.
    #[must_use]
    pub fn new(orders: OrderService) -> Self {
        Self {
            orders,
            probes: HealthProbes::default(),
        }
    }

    /// Set the readiness probes.
    #[must_use]
    pub fn with_probes(mut self, probes: HealthProbes) -> Self {
        self.probes = probes;
        self
    }
}

impl FromRef<AppState> for HealthProbes {
    fn from_ref(state: &AppState) -> Self {
        state.probes.clone()
    }
}

/// State of the notification gateway router.
#[derive(Clone)]
pub struct GatewayState {
    /// Live sessions.
    pub registry: ConnectionRegistry,
    /// Resolves bearer tokens to users.
    pub validator: Arc<dyn TokenValidator>,
    /// Accepted `Origin` values. Empty accepts any origin.
    pub allowed_origins: Arc<Vec<String>>,
    /// Keep-alive ping period.
    pub ping_interval: Duration,
    /// Per-session outbound buffer.
    pub outbound_capacity: usize,
    /// Fired once on shutdown; open sessions close when it does.
    pub shutdown: broadcast::Sender<()>,
    /// Readiness probes.
    pub probes: HealthProbes,
}

impl GatewayState {
    /// Gateway accepting any origin, pinging every 30 seconds.
    #[must_use]
    pub fn new(
        registry: ConnectionRegistry,
        validator: Arc<dyn TokenValidator>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            registry,
            validator,
            allowed_origins: Arc::new(Vec::new()),
            ping_interval: Duration::from_secs(30),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            shutdown,
            probes: HealthProbes::default(),
        }
    }

    /// Restrict upgrades to these origins.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Arc::new(origins);
        self
    }

    /// Set the keep-alive ping period. `Duration::ZERO` disables pings.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the per-session outbound buffer.
    #[must_use]
    pub const fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the readiness probes.
    #[must_use]
    pub fn with_probes(mut self, probes: HealthProbes) -> Self {
        self.probes = probes;
        self
    }

    /// Whether a request with this `Origin` header may upgrade.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        // Non-browser clients send no Origin.
        origin.is_none_or(|origin| {
            self.allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
        })
    }
}

impl FromRef<GatewayState> for HealthProbes {
    fn from_ref(state: &GatewayState) -> Self {
        state.probes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_testing::StaticTokenValidator;

    fn gateway() -> GatewayState {
        let (tx, _rx) = broadcast::channel(1);
        GatewayState::new(
            ConnectionRegistry::new(),
            Arc::new(StaticTokenValidator::new()),
            tx,
        )
    }

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
        assert_clone::<GatewayState>();
    }

    #[test]
    fn empty_allow_list_accepts_everything() {
        let state = gateway();
        assert!(state.origin_allowed(Some("https://evil.example")));
        assert!(state.origin_allowed(None));
    }

    #[test]
    fn allow_list_filters_origins() {
        let state = gateway().with_allowed_origins(vec!["https://app.example".to_string()]);
        assert!(state.origin_allowed(Some("https://APP.example")));
        assert!(!state.origin_allowed(Some("https://evil.example")));
        assert!(state.origin_allowed(None));
    }

    struct Fixed(HealthCheck);

    #[async_trait]
    impl HealthProbe for Fixed {
        async fn check(&self) -> HealthCheck {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn probes_run_in_order() {
        let probes = HealthProbes::new(vec![
            Arc::new(Fixed(HealthCheck::healthy("database"))),
            Arc::new(Fixed(HealthCheck::degraded("broker", "reconnecting"))),
        ]);
        let checks = probes.run().await;
        assert_eq!(checks[0].component, "database");
        assert_eq!(checks[1].component, "broker");
    }
}
