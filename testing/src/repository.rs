//! In-memory [`OrderRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::error::OrderError;
use courier_core::order::{Order, OrderId, OrderStatus, UserId};
use courier_core::repository::OrderRepository;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Order store backed by a `HashMap` behind one mutex.
///
/// The active-order check and the insert happen under the same lock, so
/// concurrent duplicate submissions cannot both succeed.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<HashMap<OrderId, Order>>,
    unavailable: AtomicBool,
}

impl InMemoryOrderRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a storage outage: every call fails with
    /// [`OrderError::Persistence`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OrderId, Order>> {
        self.orders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), OrderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OrderError::Persistence("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), OrderError> {
        self.check_available()?;
        let mut orders = self.lock();
        if orders
            .values()
            .any(|o| o.user_id == order.user_id && o.status.is_active())
        {
            return Err(OrderError::active_order_exists(order.user_id));
        }
        if orders.contains_key(&order.order_id) {
            return Err(OrderError::Persistence(format!(
                "duplicate order id {}",
                order.order_id
            )));
        }
        orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>, OrderError> {
        self.check_available()?;
        Ok(self.lock().get(&order_id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        self.check_available()?;
        let mut orders: Vec<Order> = self
            .lock()
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderError> {
        self.check_available()?;
        let mut orders: Vec<Order> = self
            .lock()
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    async fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        self.check_available()?;
        let mut orders = self.lock();
        let order = orders
            .get_mut(&order_id)
            .ok_or(OrderError::NotFound(order_id))?;
        order.transition(to, at)?;
        Ok(order.clone())
    }
}
