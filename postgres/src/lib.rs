//! `PostgreSQL` persistence for Courier orders.
//!
//! This crate provides:
//!
//! - [`PostgresOrderStore`]: the [`OrderRepository`](courier_core::repository::OrderRepository)
//!   used in production, with database-enforced one-active-order and
//!   conditional status transitions
//! - [`OutboxRelay`]: publishes rows from the transactional outbox
//!
//! Schema lives in `migrations/` and is applied by
//! [`PostgresOrderStore::migrate`].
//!
//! # Example
//!
//! ```ignore
//! use courier_postgres::PostgresOrderStore;
//!
//! async fn example(
//!     options: sqlx::postgres::PgConnectOptions,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresOrderStore::connect(options, 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod outbox;
pub mod store;

pub use outbox::{OutboxRelay, RelayOutcome};
pub use store::PostgresOrderStore;
