//! Order events: the routing keys and the JSON snapshot published for them.

use crate::event_bus::{EventBusError, Message};
use crate::order::{Order, OrderStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of order state change.
///
/// The serialized form is the routing key (`order.created`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A new order entered `pending`.
    #[serde(rename = "order.created")]
    Created,
    /// Reserved for the assignment flow.
    #[serde(rename = "order.assigned")]
    Assigned,
    /// Reserved for the assignment flow.
    #[serde(rename = "order.accepted")]
    Accepted,
    /// The order was cancelled.
    #[serde(rename = "order.cancelled")]
    Cancelled,
    /// The order was completed.
    #[serde(rename = "order.completed")]
    Completed,
    /// Reserved for attribute edits.
    #[serde(rename = "order.updated")]
    Updated,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Created,
        Self::Assigned,
        Self::Accepted,
        Self::Cancelled,
        Self::Completed,
        Self::Updated,
    ];

    /// Routing key on the order events exchange.
    #[must_use]
    pub const fn routing_key(self) -> &'static str {
        match self {
            Self::Created => "order.created",
            Self::Assigned => "order.assigned",
            Self::Accepted => "order.accepted",
            Self::Cancelled => "order.cancelled",
            Self::Completed => "order.completed",
            Self::Updated => "order.updated",
        }
    }

    /// Durable queue bound to this routing key.
    #[must_use]
    pub const fn queue_name(self) -> &'static str {
        match self {
            Self::Created => "queue_order_created",
            Self::Assigned => "queue_order_assigned",
            Self::Accepted => "queue_order_accepted",
            Self::Cancelled => "queue_order_cancelled",
            Self::Completed => "queue_order_completed",
            Self::Updated => "queue_order_updated",
        }
    }

    /// Event emitted when an order enters `status`, if any.
    #[must_use]
    pub const fn for_transition(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Cancelled => Some(Self::Cancelled),
            OrderStatus::Completed => Some(Self::Completed),
            OrderStatus::Pending | OrderStatus::Matching | OrderStatus::Signed => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl FromStr for EventType {
    type Err = EventBusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.routing_key() == s)
            .ok_or_else(|| {
                EventBusError::DeserializationFailed(format!("unknown routing key '{s}'"))
            })
    }
}

/// Snapshot of an order at the moment of a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderEvent {
    /// What happened.
    pub event_type: EventType,
    /// The order as committed.
    pub order: Order,
}

impl OrderEvent {
    /// Pair an order snapshot with its event type.
    #[must_use]
    pub const fn new(event_type: EventType, order: Order) -> Self {
        Self { event_type, order }
    }

    /// Encode as a broker message: the JSON order with the event's routing key.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SerializationFailed`] if JSON encoding fails.
    pub fn to_message(&self) -> Result<Message, EventBusError> {
        let payload = serde_json::to_vec(&self.order)
            .map_err(|e| EventBusError::SerializationFailed(e.to_string()))?;
        Ok(Message::json(self.event_type.routing_key(), payload))
    }

    /// Decode a consumed message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::DeserializationFailed`] if the routing key is
    /// unknown or the body is not an order snapshot.
    pub fn from_message(routing_key: &str, payload: &[u8]) -> Result<Self, EventBusError> {
        let event_type = routing_key.parse()?;
        let order = serde_json::from_slice(payload)
            .map_err(|e| EventBusError::DeserializationFailed(e.to_string()))?;
        Ok(Self { event_type, order })
    }
}
