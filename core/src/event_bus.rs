//! Broker abstraction for order events.
//!
//! The [`EventBus`] trait models an AMQP-style broker: messages are published
//! to an exchange with a routing key, the exchange routes them into bound
//! queues, and consumers read from queues.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   publish(order.events, "order.cancelled")
//! │ Order Service │──────────────────────────┐
//! └───────────────┘                          ▼
//!                                 ┌────────────────────┐
//!                                 │  order.events      │  topic exchange
//!                                 └─────────┬──────────┘
//!             ┌──────────────┬──────────────┼──────────────┐
//!             ▼              ▼              ▼              ▼
//!     queue_order_created   ...   queue_order_cancelled   ...
//!                                           │
//!                                           ▼ consume(queue, AckMode)
//!                                 ┌────────────────────┐
//!                                 │ Event Consumer     │
//!                                 └────────────────────┘
//! ```
//!
//! # Delivery Guarantees
//!
//! - **Publish** is fire-and-forget: no publisher confirm is awaited.
//! - **`AckMode::Auto`**: the broker forgets a message once delivered
//!   (at-most-once processing).
//! - **`AckMode::Manual`**: the consumer acknowledges after processing;
//!   unacknowledged messages are redelivered and rejected ones are
//!   dead-lettered (at-least-once processing).
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `courier-testing`
//! - `AmqpEventBus` in `courier-amqp`

use crate::topology::Topology;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Content type attached to every published order event.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to declare an exchange, queue or binding
    #[error("Declare failed for '{object}': {reason}")]
    DeclareFailed {
        /// The object being declared
        object: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message
    #[error("Publish failed on exchange '{exchange}' with key '{routing_key}': {reason}")]
    PublishFailed {
        /// Target exchange
        exchange: String,
        /// Routing key of the message
        routing_key: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to start consuming a queue
    #[error("Consume failed for queue '{queue}': {reason}")]
    ConsumeFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Exchange or queue is not declared
    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    /// Failed to acknowledge or reject a delivery
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),

    /// Failed to serialize a message
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize a message
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Generic error for other failures
    #[error("Event bus error: {0}")]
    Other(String),
}

/// A message ready to be published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Routing key used by the exchange to select queues.
    pub routing_key: String,
    /// Encoded body.
    pub payload: Vec<u8>,
    /// MIME type of `payload`.
    pub content_type: String,
}

impl Message {
    /// Create a JSON message.
    #[must_use]
    pub fn json(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            content_type: JSON_CONTENT_TYPE.to_string(),
        }
    }
}

/// How deliveries from a queue are acknowledged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The broker considers a message handled as soon as it is delivered.
    Auto,
    /// The consumer must [`Delivery::ack`] or [`Delivery::reject`] each message.
    #[default]
    Manual,
}

impl std::str::FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown ack mode '{other}' (expected auto or manual)")),
        }
    }
}

/// Boxed future returned by [`Acker`] methods.
pub type AckFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;

/// Settles a single manually acknowledged delivery.
pub trait Acker: Send + Sync {
    /// Confirm the delivery so the broker drops it.
    fn ack(&self) -> AckFuture<'_>;

    /// Refuse the delivery. With `requeue == false` the broker dead-letters it
    /// when the queue has a dead-letter exchange, and discards it otherwise.
    fn reject(&self, requeue: bool) -> AckFuture<'_>;
}

/// A message received from a queue.
pub struct Delivery {
    /// Queue the message was read from.
    pub queue: String,
    /// Routing key it was published with.
    pub routing_key: String,
    /// Encoded body.
    pub payload: Vec<u8>,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
    acker: Option<Box<dyn Acker>>,
}

impl Delivery {
    /// Create a delivery. `acker` is `None` for auto-acknowledged queues.
    #[must_use]
    pub fn new(
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        redelivered: bool,
        acker: Option<Box<dyn Acker>>,
    ) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
            payload,
            redelivered,
            acker,
        }
    }

    /// Whether this delivery still has to be settled.
    #[must_use]
    pub const fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge the delivery. A no-op for auto-acknowledged deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::AckFailed`] if the broker refuses the ack.
    pub async fn ack(self) -> Result<(), EventBusError> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Reject the delivery. A no-op for auto-acknowledged deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::AckFailed`] if the broker refuses the reject.
    pub async fn reject(self, requeue: bool) -> Result<(), EventBusError> {
        match self.acker {
            Some(acker) => acker.reject(requeue).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("routing_key", &self.routing_key)
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .field("requires_ack", &self.requires_ack())
            .finish()
    }
}

/// Stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for broker implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so services can hold an `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Declare exchanges, queues and bindings. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::DeclareFailed`] if the broker refuses an object.
    fn declare(
        &self,
        topology: &Topology,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Publish a message to an exchange.
    ///
    /// Returns once the message has been handed to the broker client; no
    /// publisher confirm is awaited.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the message cannot be sent.
    fn publish(
        &self,
        exchange: &str,
        message: &Message,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Start consuming a queue.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConsumeFailed`] if the subscription cannot be
    /// established.
    fn consume(
        &self,
        queue: &str,
        mode: AckMode,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>>;
}
