//! Prometheus metrics for the order and notification services.
//!
//! Metric names are shared by every crate through the constants below so the
//! exporter descriptions and the call sites never drift apart.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9464".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9464/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Orders accepted by the store.
pub const ORDERS_CREATED: &str = "courier_orders_created_total";
/// Events handed to the broker, labelled by `routing_key`.
pub const EVENTS_PUBLISHED: &str = "courier_order_events_published_total";
/// Events the broker refused.
pub const EVENTS_PUBLISH_FAILED: &str = "courier_order_events_publish_failed_total";
/// Deliveries pulled from a queue, labelled by `queue`.
pub const DELIVERIES_RECEIVED: &str = "courier_deliveries_received_total";
/// Deliveries rejected without requeue, labelled by `queue`.
pub const DELIVERIES_DEAD_LETTERED: &str = "courier_deliveries_dead_lettered_total";
/// Frames written to a live session.
pub const NOTIFICATIONS_DELIVERED: &str = "courier_notifications_delivered_total";
/// Frames that could not be written to a session.
pub const NOTIFICATIONS_FAILED: &str = "courier_notifications_failed_total";
/// Outbox rows published by the relay.
pub const OUTBOX_RELAYED: &str = "courier_outbox_relayed_total";
/// Live gateway sessions.
pub const WS_CONNECTIONS: &str = "courier_ws_connections";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// Must be called from inside a Tokio runtime; the listener is spawned
    /// onto it.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the exporter cannot be built. A
    /// recorder that is already installed is logged and tolerated.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        let handle = recorder.handle();

        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %e, "Metrics recorder already initialized, skipping");
            return Ok(());
        }

        let addr = self.addr;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics listener stopped");
            }
        });

        register_metrics();
        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(ORDERS_CREATED, "Orders persisted in pending state");
    describe_counter!(
        EVENTS_PUBLISHED,
        "Order events accepted by the broker, by routing key"
    );
    describe_counter!(
        EVENTS_PUBLISH_FAILED,
        "Order events that failed to publish after the commit"
    );
    describe_counter!(DELIVERIES_RECEIVED, "Deliveries received, by queue");
    describe_counter!(
        DELIVERIES_DEAD_LETTERED,
        "Deliveries rejected to the dead-letter exchange, by queue"
    );
    describe_counter!(
        NOTIFICATIONS_DELIVERED,
        "Notification frames handed to a live session"
    );
    describe_counter!(
        NOTIFICATIONS_FAILED,
        "Notification frames dropped because the session was gone or full"
    );
    describe_counter!(OUTBOX_RELAYED, "Outbox rows published by the relay");
    describe_gauge!(WS_CONNECTIONS, "Live notification gateway sessions");
}
