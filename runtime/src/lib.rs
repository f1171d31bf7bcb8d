//! # Courier Runtime
//!
//! Long-running machinery shared by the order and notification services.
//!
//! ## Core Components
//!
//! - **[`EventConsumer`]**: subscribe-process-reconnect loop for one queue
//! - **[`retry`]**: exponential backoff for broker and database connects
//! - **[`lifecycle`]**: signal handling and bounded task shutdown
//! - **[`metrics`]**: Prometheus exporter and metric names
//! - **[`health`]**: readiness reports for the probe endpoints
//!
//! ## Example
//!
//! ```ignore
//! use courier_runtime::EventConsumer;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let handle = EventConsumer::new("notifier", "queue_order_cancelled", bus, handler, shutdown_rx)
//!     .spawn();
//!
//! courier_runtime::lifecycle::shutdown_signal().await;
//! let _ = shutdown_tx.send(());
//! ```

pub mod consumer;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod retry;

pub use consumer::{DeliveryHandler, EventConsumer, HandlerError};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use retry::{RetryPolicy, retry_with_backoff};
