//! Service assembly for Courier.
//!
//! Two binaries share this crate:
//!
//! - **order-service**: the order API over Postgres, publishing to
//!   `order.events` directly or through the transactional outbox
//! - **notification-service**: consumes every order queue and pushes each
//!   event to the owning user's WebSocket sessions
//!
//! Both load [`Config`] from the environment, install tracing with
//! [`init_tracing`], and hand control to [`Application::run`].

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod config;
pub mod notifier;
pub mod telemetry;

pub use app::{Application, notification_consumers, topology};
pub use config::{Config, ConfigError, LogFormat};
pub use notifier::{Notifier, NotifyReport, OrderEventHandler};
pub use telemetry::init_tracing;
