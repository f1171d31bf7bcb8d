//! Queue consumer with automatic reconnection.
//!
//! [`EventConsumer`] owns the subscribe-process-reconnect loop for one queue
//! and settles every delivery according to what its [`DeliveryHandler`]
//! reports.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     consume(queue, ack_mode):
//!         loop {
//!             handle delivery
//!             Ok            -> ack
//!             Malformed     -> reject, no requeue (dead-letter)
//!             Transient     -> reject, requeue once, then dead-letter
//!             shutdown?     -> return
//!         }
//!     stream ended / consume failed -> wait retry_delay
//! }
//! ```
//!
//! With [`AckMode::Auto`] the broker has already forgotten the message, so
//! settlement is skipped and handler errors are only logged.

use async_trait::async_trait;
use courier_core::event_bus::{AckMode, Delivery, DeliveryStream, EventBus};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Why a handler could not process a delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The message can never be processed (undecodable, unknown type).
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Processing failed for a reason that may go away on retry.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// Processes deliveries for an [`EventConsumer`].
///
/// Implementations decode the payload into their own event type. Returning
/// `Ok` acknowledges the message.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Handle one delivery.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Malformed`] to dead-letter the message,
    /// [`HandlerError::Transient`] to have it redelivered once.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Consumer bound to a single queue.
///
/// # Lifecycle
///
/// 1. Created via [`EventConsumer::new`]
/// 2. Spawned as background task via [`EventConsumer::spawn`]
/// 3. Runs until the shutdown broadcast fires or its sender is dropped
pub struct EventConsumer {
    /// Consumer name (for logging)
    name: String,

    /// Queue to consume
    queue: String,

    /// Acknowledgement mode requested from the broker
    ack_mode: AckMode,

    /// Broker to consume from
    event_bus: Arc<dyn EventBus>,

    /// Handler for processing deliveries
    handler: Arc<dyn DeliveryHandler>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Delay before re-subscribing (default: 5 seconds)
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a manual-ack consumer with the default 5 second retry delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            ack_mode: AckMode::Manual,
            event_bus,
            handler,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set acknowledgement mode.
    #[must_use]
    pub const fn with_ack_mode(mut self, mode: AckMode) -> Self {
        self.ack_mode = mode;
        self
    }

    /// Set custom retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Queue this consumer reads.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run until shutdown.
    pub async fn run(&mut self) {
        info!(
            consumer = %self.name,
            queue = %self.queue,
            mode = ?self.ack_mode,
            "Event consumer started"
        );

        loop {
            let subscribe_result = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                result = self.event_bus.consume(&self.queue, self.ack_mode) => result,
            };

            match subscribe_result {
                Ok(mut stream) => {
                    info!(consumer = %self.name, queue = %self.queue, "Subscribed to queue");
                    if self.process_stream(&mut stream).await {
                        break;
                    }
                    warn!(
                        consumer = %self.name,
                        "Delivery stream ended, reconnecting in {:?}",
                        self.retry_delay
                    );
                }
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to consume queue, retrying in {:?}",
                        self.retry_delay
                    );
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown signal received while waiting to reconnect");
                    break;
                }
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Drain the stream. Returns `true` if shutdown was requested.
    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown signal received during processing");
                    return true;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.process(delivery).await,
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving delivery");
                    }
                    None => return false,
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        metrics::counter!(crate::metrics::DELIVERIES_RECEIVED, "queue" => self.queue.clone())
            .increment(1);
        let outcome = self.handler.handle(&delivery).await;

        if !delivery.requires_ack() {
            if let Err(e) = outcome {
                error!(consumer = %self.name, error = %e, "Failed to handle delivery");
            }
            return;
        }

        let settled = match outcome {
            Ok(()) => delivery.ack().await,
            Err(HandlerError::Malformed(reason)) => {
                warn!(consumer = %self.name, reason = %reason, "Dead-lettering malformed delivery");
                metrics::counter!(
                    crate::metrics::DELIVERIES_DEAD_LETTERED,
                    "queue" => self.queue.clone()
                )
                .increment(1);
                delivery.reject(false).await
            }
            Err(HandlerError::Transient(reason)) => {
                let requeue = !delivery.redelivered;
                warn!(
                    consumer = %self.name,
                    reason = %reason,
                    requeue,
                    "Rejecting delivery after transient failure"
                );
                delivery.reject(requeue).await
            }
        };

        match settled {
            Ok(()) => debug!(consumer = %self.name, "Delivery settled"),
            Err(e) => error!(consumer = %self.name, error = %e, "Failed to settle delivery"),
        }
    }
}
