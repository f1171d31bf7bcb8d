//! Application assembly and lifecycle for both services.
//!
//! # Graceful Shutdown
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. Shutdown is broadcast, so gateway sessions send Close and consumers
//!    stop pulling
//! 2. The HTTP server stops accepting new connections and drains
//! 3. Background tasks get `shutdown_timeout` each to finish
//! 4. Remaining gateway sessions are dropped from the registry

use crate::config::Config;
use crate::notifier::{Notifier, OrderEventHandler};
use async_trait::async_trait;
use courier_amqp::AmqpEventBus;
use courier_auth::AuthClient;
use courier_core::OrderError;
use courier_core::environment::SystemClock;
use courier_core::event::EventType;
use courier_core::event_bus::{AckMode, EventBus};
use courier_core::service::OrderService;
use courier_core::topology::Topology;
use courier_postgres::{OutboxRelay, PostgresOrderStore};
use courier_runtime::lifecycle::{await_shutdown, shutdown_signal};
use courier_runtime::metrics::MetricsServer;
use courier_runtime::{EventConsumer, HealthCheck, RetryPolicy, retry_with_backoff};
use courier_web::{
    AppState, ConnectionRegistry, GatewayState, HealthProbe, HealthProbes, gateway_router,
    order_router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// A bound listener, its router and the background tasks that live as long
/// as it does.
pub struct Application {
    listener: TcpListener,
    router: axum::Router,
    consumers: Vec<EventConsumer>,
    relay: Option<OutboxRelay>,
    registry: Option<ConnectionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Application serving `router` on `listener` with no background tasks.
    ///
    /// Consumers and relays added later must subscribe to `shutdown_tx`.
    #[must_use]
    pub const fn new(
        listener: TcpListener,
        router: axum::Router,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            listener,
            router,
            consumers: Vec::new(),
            relay: None,
            registry: None,
            shutdown_tx,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Add queue consumers.
    #[must_use]
    pub fn with_consumers(mut self, consumers: Vec<EventConsumer>) -> Self {
        self.consumers.extend(consumers);
        self
    }

    /// Run an outbox relay alongside the server.
    #[must_use]
    pub fn with_relay(mut self, relay: OutboxRelay) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Gateway sessions to drop after shutdown.
    #[must_use]
    pub fn with_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Time each background task gets to stop (default: 10 seconds).
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Assemble the order service: Postgres store, broker publisher, order
    /// API and, when enabled, the outbox relay.
    ///
    /// # Errors
    ///
    /// Fails if the database or the broker stays unreachable, a migration
    /// fails, the topology is refused, or the listener cannot bind.
    pub async fn order_service(config: &Config) -> anyhow::Result<Self> {
        start_metrics(config)?;

        let options = config.postgres.connect_options();
        let max_connections = config.postgres.max_connections;
        let store = retry_with_backoff(startup_retry(), || {
            PostgresOrderStore::connect(options.clone(), max_connections)
        })
        .await?
        .with_outbox(config.outbox.enabled);
        store.migrate().await?;
        info!(
            host = %config.postgres.host,
            database = %config.postgres.database,
            outbox = config.outbox.enabled,
            "Order store ready"
        );

        let broker = connect_broker(config).await?;
        let event_bus: Arc<dyn EventBus> = broker.clone();

        let (shutdown_tx, _) = broadcast::channel(16);

        let orders = OrderService::new(
            Arc::new(store.clone()),
            event_bus.clone(),
            Arc::new(SystemClock),
        );
        let mut probes: Vec<Arc<dyn HealthProbe>> = vec![
            Arc::new(PostgresProbe(store.clone())),
            Arc::new(BrokerProbe(broker)),
        ];
        if config.outbox.enabled {
            probes.push(Arc::new(OutboxProbe(store.clone())));
        }
        let probes = HealthProbes::new(probes);
        let router = order_router(AppState::new(orders).with_probes(probes));

        let listener = bind(config).await?;
        let mut app = Self::new(listener, router, shutdown_tx.clone())
            .with_shutdown_timeout(config.server.shutdown_timeout);

        if config.outbox.enabled {
            let relay = OutboxRelay::new(store.pool().clone(), event_bus, shutdown_tx.subscribe())
                .with_poll_interval(config.outbox.poll_interval)
                .with_batch_size(config.outbox.batch_size)
                .with_max_attempts(config.outbox.max_attempts);
            app = app.with_relay(relay);
        }

        Ok(app)
    }

    /// Assemble the notification service: one consumer per order queue, the
    /// connection registry and the authenticated WebSocket gateway.
    ///
    /// # Errors
    ///
    /// Fails if the broker stays unreachable, the topology is refused, the
    /// auth client cannot be built, or the listener cannot bind.
    pub async fn notification_service(config: &Config) -> anyhow::Result<Self> {
        start_metrics(config)?;

        let broker = connect_broker(config).await?;
        let event_bus: Arc<dyn EventBus> = broker.clone();

        let validator = Arc::new(AuthClient::new(&config.auth.url, config.auth.timeout)?);
        info!(url = %config.auth.url, "Auth gateway client ready");

        let (shutdown_tx, _) = broadcast::channel(16);
        let registry = ConnectionRegistry::new();

        let consumers = notification_consumers(
            &event_bus,
            &registry,
            config.gateway.ack_mode,
            &shutdown_tx,
        );

        let state = GatewayState::new(registry.clone(), validator, shutdown_tx.clone())
            .with_allowed_origins(config.gateway.allowed_origins.clone())
            .with_ping_interval(config.gateway.ping_interval)
            .with_probes(HealthProbes::new(vec![Arc::new(BrokerProbe(broker))]));
        let router = gateway_router(state);

        let listener = bind(config).await?;
        Ok(Self::new(listener, router, shutdown_tx)
            .with_consumers(consumers)
            .with_registry(registry)
            .with_shutdown_timeout(config.server.shutdown_timeout))
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_until<F>(self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.listener.local_addr()?;

        info!(consumer_count = self.consumers.len(), "Starting event consumers");
        let mut handles: Vec<(String, tokio::task::JoinHandle<()>)> = self
            .consumers
            .into_iter()
            .map(|consumer| (consumer.queue().to_string(), consumer.spawn()))
            .collect();

        if let Some(relay) = self.relay {
            info!("Starting outbox relay");
            handles.push(("outbox-relay".to_string(), relay.spawn()));
        }

        let shutdown_tx = self.shutdown_tx.clone();
        let graceful = async move {
            signal.await;
            info!("Shutdown requested, closing sessions and consumers");
            let _ = shutdown_tx.send(());
        };

        info!(address = %addr, "HTTP server listening for requests");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(graceful)
            .await?;

        info!("HTTP server stopped, waiting for background tasks");
        // A server error skips the graceful future; make sure tasks stop.
        let _ = self.shutdown_tx.send(());

        let total = handles.len();
        let stopped = await_shutdown(handles, self.shutdown_timeout).await;

        if let Some(registry) = self.registry {
            let dropped = registry.close_all();
            info!(dropped, "Gateway sessions released");
        }

        info!(stopped, total, "Graceful shutdown complete");
        Ok(())
    }
}

/// One consumer per order queue, each pushing decoded events through a
/// shared [`Notifier`].
#[must_use]
pub fn notification_consumers(
    event_bus: &Arc<dyn EventBus>,
    registry: &ConnectionRegistry,
    ack_mode: AckMode,
    shutdown_tx: &broadcast::Sender<()>,
) -> Vec<EventConsumer> {
    let handler = Arc::new(OrderEventHandler::new(Notifier::new(registry.clone())));

    EventType::ALL
        .into_iter()
        .map(|event_type| {
            EventConsumer::new(
                format!("notifier-{event_type}"),
                event_type.queue_name(),
                event_bus.clone(),
                handler.clone(),
                shutdown_tx.subscribe(),
            )
            .with_ack_mode(ack_mode)
        })
        .collect()
}

/// The broker layout declared by both services.
#[must_use]
pub fn topology(dead_letter: bool) -> Topology {
    let topology = Topology::order_events();
    if dead_letter {
        topology.with_dead_letter()
    } else {
        topology
    }
}

async fn connect_broker(config: &Config) -> anyhow::Result<Arc<AmqpEventBus>> {
    let broker = AmqpEventBus::builder()
        .url(&config.broker.url)
        .connect_retry(startup_retry())
        .build()
        .await?;
    broker.declare(&topology(config.broker.dead_letter)).await?;
    info!(
        url = %broker.redacted_url(),
        dead_letter = config.broker.dead_letter,
        "Broker topology declared"
    );
    Ok(Arc::new(broker))
}

async fn bind(config: &Config) -> anyhow::Result<TcpListener> {
    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!(
        service = %config.service.name,
        version = %config.service.version,
        address = %address,
        "Listener bound"
    );
    Ok(listener)
}

fn start_metrics(config: &Config) -> anyhow::Result<()> {
    if let Some(port) = config.server.metrics_port {
        let addr: SocketAddr = format!("{}:{port}", config.server.host).parse()?;
        MetricsServer::new(addr).start()?;
    }
    Ok(())
}

fn startup_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(10)
        .initial_delay(Duration::from_millis(500))
        .max_delay(Duration::from_secs(10))
        .jitter(0.2)
        .build()
}

struct PostgresProbe(PostgresOrderStore);

#[async_trait]
impl HealthProbe for PostgresProbe {
    async fn check(&self) -> HealthCheck {
        match self.0.ping().await {
            Ok(()) => HealthCheck::healthy("postgres"),
            Err(e) => HealthCheck::unhealthy("postgres", e.to_string()),
        }
    }
}

/// Unpublished outbox rows beyond which the order service reports degraded.
const OUTBOX_BACKLOG_LIMIT: i64 = 1_000;

struct OutboxProbe(PostgresOrderStore);

#[async_trait]
impl HealthProbe for OutboxProbe {
    async fn check(&self) -> HealthCheck {
        outbox_health(self.0.outbox_backlog().await)
    }
}

fn outbox_health(backlog: Result<i64, OrderError>) -> HealthCheck {
    match backlog {
        Ok(rows) if rows >= OUTBOX_BACKLOG_LIMIT => {
            HealthCheck::degraded("outbox", format!("{rows} events waiting to be relayed"))
        }
        Ok(_) => HealthCheck::healthy("outbox"),
        Err(e) => HealthCheck::unhealthy("outbox", e.to_string()),
    }
}

struct BrokerProbe(Arc<AmqpEventBus>);

#[async_trait]
impl HealthProbe for BrokerProbe {
    async fn check(&self) -> HealthCheck {
        if self.0.is_connected().await {
            HealthCheck::healthy("broker")
        } else {
            HealthCheck::unhealthy("broker", "connection lost")
        }
    }
}
