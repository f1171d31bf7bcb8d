//! # Courier Core
//!
//! Domain types and contracts for the Courier order events backbone.
//!
//! This crate has no I/O of its own. It defines:
//!
//! - **Orders**: the [`order::Order`] aggregate and its lifecycle state machine
//! - **Events**: routing keys and the JSON snapshot published per transition
//! - **Topology**: the `order.events` exchange and its six durable queues
//! - **Contracts**: [`event_bus::EventBus`], [`repository::OrderRepository`]
//!   and [`identity::TokenValidator`], implemented by adapter crates
//! - **Service**: [`service::OrderService`], the only writer of order state
//!
//! ## Data Flow
//!
//! ```text
//! client ──► OrderService ──► OrderRepository (commit)
//!                 │
//!                 └─────────► EventBus ──► order.events ──► queue_order_*
//!                                                              │
//!                                       notifier ◄─────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use courier_core::{order::CreateOrderRequest, service::OrderService};
//!
//! let service = OrderService::new(repository, event_bus, Arc::new(SystemClock));
//! let order = service.create_order(CreateOrderRequest {
//!     user_id: user_id.to_string(),
//!     order_address: "1 Main St".into(),
//!     order_location: "downtown".into(),
//!     order_date: "2025-01-01T10:00:00Z".into(),
//!     order_time_gap: "30m".into(),
//! }).await?;
//! assert_eq!(order.status, OrderStatus::Pending);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod error;
pub mod event;
pub mod event_bus;
pub mod identity;
pub mod order;
pub mod repository;
pub mod service;
pub mod time_gap;
pub mod topology;

pub use error::OrderError;
pub use order::{Order, OrderId, OrderStatus, UserId};

/// Environment module - injected dependencies that make behavior deterministic
/// under test.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
