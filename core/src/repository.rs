//! Persistence contract for orders.

use crate::error::OrderError;
use crate::order::{Order, OrderId, OrderStatus, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable order storage.
///
/// Implementations own two invariants:
///
/// - **One active order per user.** [`insert`](Self::insert) must refuse a
///   second order in `pending`, `matching` or `signed` for the same user with
///   [`OrderError::Conflict`], atomically with the write.
/// - **Serialized transitions.** [`transition`](Self::transition) must apply
///   the status change only if the stored status is still a valid source,
///   in a single conditional write.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new `pending` order.
    ///
    /// # Errors
    ///
    /// [`OrderError::Conflict`] if the user already has an active order,
    /// [`OrderError::Persistence`] on storage failure.
    async fn insert(&self, order: &Order) -> Result<(), OrderError>;

    /// Fetch one order.
    ///
    /// # Errors
    ///
    /// [`OrderError::Persistence`] on storage failure.
    async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>, OrderError>;

    /// All orders owned by `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// [`OrderError::Persistence`] on storage failure.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError>;

    /// All orders currently in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// [`OrderError::Persistence`] on storage failure.
    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderError>;

    /// Move an order to `to`, stamping `updated_at` with `at`.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] if the order does not exist,
    /// [`OrderError::InvalidTransition`] if its status does not allow `to`,
    /// [`OrderError::Persistence`] on storage failure.
    async fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, OrderError>;

    /// Whether writes also record an outbox row for a relay to publish.
    ///
    /// When `true` the service does not publish directly.
    fn records_outbox(&self) -> bool {
        false
    }
}
