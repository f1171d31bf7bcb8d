//! Pushes consumed order events to the owning user's live sessions.
//!
//! ```text
//! queue_order_* ──► EventConsumer ──► OrderEventHandler ──► Notifier ──► registry.get(user)
//!                                                                         │
//!                                            {"type": "order.cancelled", "payload": {...}}
//!                                                                         ▼
//!                                                               every session of the user
//! ```
//!
//! A user with no live session is not an error: the event is acknowledged
//! and dropped. A failed push to one session never stops delivery to the
//! others.

use async_trait::async_trait;
use courier_core::event::{EventType, OrderEvent};
use courier_core::event_bus::Delivery;
use courier_core::order::{Order, UserId};
use courier_runtime::metrics::{NOTIFICATIONS_DELIVERED, NOTIFICATIONS_FAILED};
use courier_runtime::{DeliveryHandler, HandlerError};
use courier_web::ConnectionRegistry;
use serde::Serialize;
use tracing::{debug, warn};

/// Frame written to the socket for each event.
#[derive(Debug, Serialize)]
pub struct NotificationFrame<'a> {
    /// Routing key of the event.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The order snapshot carried by the event.
    pub payload: &'a Order,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Sessions that accepted the frame.
    pub delivered: usize,
    /// Sessions that were closed or full.
    pub failed: usize,
}

/// Fans frames out over the [`ConnectionRegistry`].
#[derive(Clone)]
pub struct Notifier {
    registry: ConnectionRegistry,
}

impl Notifier {
    /// Notifier over `registry`.
    #[must_use]
    pub const fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Push `frame` to every session of `user_id`.
    pub fn notify(&self, user_id: UserId, frame: &str) -> NotifyReport {
        let mut report = NotifyReport::default();
        let Some(sessions) = self.registry.get(user_id) else {
            debug!(user_id = %user_id, "No live session, notification dropped");
            return report;
        };

        for session in sessions {
            match session.push(frame.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(user_id = %user_id, error = %e, "Notification push failed");
                }
            }
        }

        metrics::counter!(NOTIFICATIONS_DELIVERED).increment(report.delivered as u64);
        metrics::counter!(NOTIFICATIONS_FAILED).increment(report.failed as u64);
        report
    }
}

/// [`DeliveryHandler`] that decodes order events and hands them to a
/// [`Notifier`].
pub struct OrderEventHandler {
    notifier: Notifier,
}

impl OrderEventHandler {
    /// Handler over `notifier`.
    #[must_use]
    pub const fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl DeliveryHandler for OrderEventHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let event = OrderEvent::from_message(&delivery.routing_key, &delivery.payload)
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;

        let frame = serde_json::to_string(&NotificationFrame {
            event_type: event.event_type,
            payload: &event.order,
        })
        .map_err(|e| HandlerError::Malformed(e.to_string()))?;

        let report = self.notifier.notify(event.order.user_id, &frame);
        debug!(
            order_id = %event.order.order_id,
            event = %event.event_type,
            delivered = report.delivered,
            failed = report.failed,
            "Order event handled"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_core::environment::Clock;
    use courier_core::order::{OrderId, OrderStatus};
    use courier_testing::helpers::order_request;
    use courier_testing::test_clock;
    use courier_web::SessionHandle;
    use serde_json::Value;

    fn order_for(user_id: UserId) -> Order {
        let now = test_clock().now();
        let new = order_request(user_id).validate().unwrap();
        let mut order = Order::from_new(new, OrderId::new(), now);
        order.transition(OrderStatus::Cancelled, now).unwrap();
        order
    }

    fn delivery(routing_key: &str, payload: Vec<u8>) -> Delivery {
        Delivery::new("queue_order_cancelled", routing_key, payload, false, None)
    }

    fn cancelled(user_id: UserId) -> Delivery {
        let order = order_for(user_id);
        delivery("order.cancelled", serde_json::to_vec(&order).unwrap())
    }

    #[tokio::test]
    async fn user_without_sessions_is_acknowledged() {
        let handler = OrderEventHandler::new(Notifier::new(ConnectionRegistry::new()));
        assert!(handler.handle(&cancelled(UserId::random())).await.is_ok());
    }

    #[tokio::test]
    async fn frame_reaches_every_session_of_the_user() {
        let registry = ConnectionRegistry::new();
        let user = UserId::random();
        let (first, mut first_rx) = SessionHandle::channel(4);
        let (second, mut second_rx) = SessionHandle::channel(4);
        let (other, mut other_rx) = SessionHandle::channel(4);
        registry.add(user, first);
        registry.add(user, second);
        registry.add(UserId::random(), other);

        let handler = OrderEventHandler::new(Notifier::new(registry));
        handler.handle(&cancelled(user)).await.unwrap();

        for rx in [&mut first_rx, &mut second_rx] {
            let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["type"], "order.cancelled");
            assert_eq!(frame["payload"]["user_id"], user.to_string());
            assert_eq!(frame["payload"]["order_status"], "cancelled");
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_session_does_not_block_the_rest() {
        let registry = ConnectionRegistry::new();
        let user = UserId::random();
        let (gone, gone_rx) = SessionHandle::channel(4);
        let (live, mut live_rx) = SessionHandle::channel(4);
        registry.add(user, gone);
        registry.add(user, live);
        drop(gone_rx);

        let report = Notifier::new(registry).notify(user, "frame");
        assert_eq!(
            report,
            NotifyReport {
                delivered: 1,
                failed: 1
            }
        );
        assert_eq!(live_rx.try_recv().unwrap(), "frame");
    }

    #[tokio::test]
    async fn undecodable_event_is_malformed() {
        let handler = OrderEventHandler::new(Notifier::new(ConnectionRegistry::new()));

        let err = handler
            .handle(&delivery("order.cancelled", b"not json".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Malformed(_)));

        let order = serde_json::to_vec(&order_for(UserId::random())).unwrap();
        let err = handler
            .handle(&delivery("order.exploded", order))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Malformed(_)));
    }
}
