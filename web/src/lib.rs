//! Axum surface of Courier.
//!
//! - **Order API**: JSON remote calls over [`OrderService`](courier_core::service::OrderService),
//!   with domain errors mapped to statuses by [`AppError`]
//! - **Notification gateway**: `GET /ws`, authenticated with a bearer token,
//!   registering each session in the [`ConnectionRegistry`]
//! - **Plumbing**: correlation-id middleware, extractors, health probes
//!
//! # Request Flow
//!
//! ```text
//! POST /orders ──► correlation span ──► handler ──► OrderService ──► {success, order}
//!                                                       │ OrderError
//!                                                       ▼
//!                                                   AppError {code, message}
//!
//! GET /ws ──► origin ──► bearer ──► TokenValidator ──► upgrade ──► registry.add
//! ```
//!
//! # Example
//!
//! ```ignore
//! let app = courier_web::order_router(AppState::new(order_service));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:9000").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{BearerToken, CorrelationId};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use registry::{ConnectionId, ConnectionRegistry, PushError, SessionHandle};
pub use router::{gateway_router, order_router};
pub use state::{AppState, GatewayState, HealthProbe, HealthProbes};
