//! # Courier Testing
//!
//! Test doubles for the Courier contracts.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: topic routing, manual acks and dead-lettering
//! - [`InMemoryOrderRepository`]: atomic one-active-order enforcement
//! - [`StaticTokenValidator`]: table-driven token validation
//! - [`FixedClock`] and [`test_clock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{InMemoryEventBus, InMemoryOrderRepository, helpers, test_clock};
//!
//! #[tokio::test]
//! async fn creates_pending_order() {
//!     let bus = Arc::new(InMemoryEventBus::with_topology(&Topology::order_events()));
//!     let service = OrderService::new(
//!         Arc::new(InMemoryOrderRepository::new()),
//!         bus.clone(),
//!         Arc::new(test_clock()),
//!     );
//!
//!     let order = service.create_order(helpers::order_request(UserId::random())).await?;
//!     assert_eq!(order.status, OrderStatus::Pending);
//!     assert_eq!(bus.published_keys(), vec!["order.created"]);
//! }
//! ```

use chrono::{DateTime, Utc};
use courier_core::environment::Clock;

pub mod auth;
pub mod event_bus;
pub mod repository;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_testing::mocks::FixedClock;
    /// use courier_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use courier_core::order::{CreateOrderRequest, UserId};

    /// The canonical create request used across the test suites.
    #[must_use]
    pub fn order_request(user_id: UserId) -> CreateOrderRequest {
        CreateOrderRequest {
            user_id: user_id.to_string(),
            order_address: "1 Main St".to_string(),
            order_location: "downtown".to_string(),
            order_date: "2025-01-01T10:00:00Z".to_string(),
            order_time_gap: "30m".to_string(),
        }
    }

    /// Install a test-friendly tracing subscriber. Safe to call repeatedly.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use auth::StaticTokenValidator;
pub use event_bus::{InMemoryEventBus, PublishedMessage};
pub use mocks::{FixedClock, test_clock};
pub use repository::InMemoryOrderRepository;
