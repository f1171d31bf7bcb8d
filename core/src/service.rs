//! The order service: sole writer of order state.
//!
//! Every mutation is committed through the [`OrderRepository`] first and only
//! then announced on the [`EventBus`]. A failed publish is logged and counted
//! but never undoes the committed write; stores that record an outbox take
//! over publishing entirely.

use crate::environment::Clock;
use crate::error::OrderError;
use crate::event::{EventType, OrderEvent};
use crate::event_bus::EventBus;
use crate::order::{CreateOrderRequest, Order, OrderId, OrderStatus, UserId};
use crate::repository::OrderRepository;
use crate::topology::ORDER_EVENTS_EXCHANGE;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates the order store and the event publisher.
#[derive(Clone)]
pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl OrderService {
    /// Create a service publishing to the `order.events` exchange.
    #[must_use]
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            event_bus,
            clock,
        }
    }

    /// Create a `pending` order and announce `order.created`.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Validation`] for malformed input
    /// - [`OrderError::Conflict`] if the user already has an active order
    /// - [`OrderError::Persistence`] if the store fails
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, OrderError> {
        let new = request.validate()?;
        let order = Order::from_new(new, OrderId::new(), self.clock.now());

        self.repository.insert(&order).await?;
        metrics::counter!("courier_orders_created_total").increment(1);
        info!(order_id = %order.order_id, user_id = %order.user_id, "Order created");

        self.publish(EventType::Created, &order).await;
        Ok(order)
    }

    /// All orders owned by `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// [`OrderError::Persistence`] if the store fails.
    pub async fn get_user_orders(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        self.repository.find_by_user(user_id).await
    }

    /// Every `pending` order, oldest first.
    ///
    /// # Errors
    ///
    /// [`OrderError::Persistence`] if the store fails.
    pub async fn get_available_orders(&self) -> Result<Vec<Order>, OrderError> {
        self.repository.find_by_status(OrderStatus::Pending).await
    }

    /// Fetch one order.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] if it does not exist.
    pub async fn get_order_by_id(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.repository
            .find_by_id(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    /// Cancel a non-terminal order and announce `order.cancelled`.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] or [`OrderError::InvalidTransition`].
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.transition(order_id, OrderStatus::Cancelled).await
    }

    /// Complete a non-terminal order and announce `order.completed`.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] or [`OrderError::InvalidTransition`].
    pub async fn complete_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.transition(order_id, OrderStatus::Completed).await
    }

    async fn transition(&self, order_id: OrderId, to: OrderStatus) -> Result<Order, OrderError> {
        let order = self
            .repository
            .transition(order_id, to, self.clock.now())
            .await?;
        info!(order_id = %order_id, status = %to, "Order transitioned");

        if let Some(event_type) = EventType::for_transition(to) {
            self.publish(event_type, &order).await;
        }
        Ok(order)
    }

    /// Announce a committed change. Failures are logged, never returned.
    async fn publish(&self, event_type: EventType, order: &Order) {
        if self.repository.records_outbox() {
            debug!(
                order_id = %order.order_id,
                routing_key = %event_type,
                "Event recorded in outbox"
            );
            return;
        }

        let result = match OrderEvent::new(event_type, order.clone()).to_message() {
            Ok(message) => self.event_bus.publish(ORDER_EVENTS_EXCHANGE, &message).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                metrics::counter!(
                    "courier_order_events_published_total",
                    "routing_key" => event_type.routing_key()
                )
                .increment(1);
                debug!(
                    order_id = %order.order_id,
                    routing_key = %event_type,
                    "Order event published"
                );
            }
            Err(e) => {
                metrics::counter!("courier_order_events_publish_failed_total").increment(1);
                warn!(
                    order_id = %order.order_id,
                    routing_key = %event_type,
                    error = %e,
                    "Order committed but event publish failed"
                );
            }
        }
    }
}
