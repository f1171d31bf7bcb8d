//! In-memory broker with AMQP-like routing.
//!
//! Messages published to an exchange are routed into bound queues using the
//! declared [`Topology`] (topic wildcards included). Each queue holds ready
//! messages until a consumer attaches; one consumer per queue. Manual-ack
//! deliveries stay unacknowledged until settled, and a reject without requeue
//! forwards the message to the queue's dead-letter exchange.

use courier_core::event_bus::{
    AckFuture, AckMode, Acker, Delivery, DeliveryStream, EventBus, EventBusError, Message,
};
use courier_core::topology::Topology;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// A message as recorded at publish time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Exchange it was published to.
    pub exchange: String,
    /// The message itself.
    pub message: Message,
}

#[derive(Clone, Debug)]
struct StoredMessage {
    routing_key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    mode: AckMode,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct QueueState {
    dead_letter_exchange: Option<String>,
    ready: VecDeque<StoredMessage>,
    unacked: usize,
    consumer: Option<Consumer>,
}

#[derive(Default)]
struct BusState {
    topology: Topology,
    queues: HashMap<String, QueueState>,
    published: Vec<PublishedMessage>,
    publish_failure: Option<String>,
}

type Shared = Arc<Mutex<BusState>>;

impl BusState {
    fn merge(&mut self, topology: &Topology) {
        for exchange in &topology.exchanges {
            if self.topology.exchange(&exchange.name).is_none() {
                self.topology.exchanges.push(exchange.clone());
            }
        }
        for queue in &topology.queues {
            if self.topology.queue(&queue.name).is_none() {
                self.topology.queues.push(queue.clone());
            }
            self.queues
                .entry(queue.name.clone())
                .or_insert_with(|| QueueState {
                    dead_letter_exchange: queue.dead_letter_exchange.clone(),
                    ready: VecDeque::new(),
                    unacked: 0,
                    consumer: None,
                });
        }
        for binding in &topology.bindings {
            if !self.topology.bindings.contains(binding) {
                self.topology.bindings.push(binding.clone());
            }
        }
    }

    fn route(
        &mut self,
        exchange: &str,
        message: StoredMessage,
        shared: &Shared,
    ) -> Result<(), EventBusError> {
        if self.topology.exchange(exchange).is_none() {
            return Err(EventBusError::UnknownDestination(format!(
                "exchange '{exchange}' is not declared"
            )));
        }
        let targets: Vec<String> = self
            .topology
            .route(exchange, &message.routing_key)
            .into_iter()
            .map(str::to_string)
            .collect();
        for queue in targets {
            if let Some(state) = self.queues.get_mut(&queue) {
                state.ready.push_back(message.clone());
            }
            self.dispatch(&queue, shared);
        }
        Ok(())
    }

    fn dispatch(&mut self, queue: &str, shared: &Shared) {
        let Some(state) = self.queues.get_mut(queue) else {
            return;
        };
        let (mode, sender) = match &state.consumer {
            Some(consumer) => (consumer.mode, consumer.sender.clone()),
            None => return,
        };

        while let Some(message) = state.ready.pop_front() {
            let acker: Option<Box<dyn Acker>> = match mode {
                AckMode::Auto => None,
                AckMode::Manual => Some(Box::new(InMemoryAcker {
                    shared: Arc::clone(shared),
                    queue: queue.to_string(),
                    message: message.clone(),
                })),
            };
            let delivery = Delivery::new(
                queue,
                message.routing_key.clone(),
                message.payload.clone(),
                message.redelivered,
                acker,
            );
            if sender.send(delivery).is_err() {
                state.ready.push_front(message);
                state.consumer = None;
                break;
            }
            if mode == AckMode::Manual {
                state.unacked += 1;
            }
        }
    }
}

struct InMemoryAcker {
    shared: Shared,
    queue: String,
    message: StoredMessage,
}

impl InMemoryAcker {
    fn settle(&self, reject: Option<bool>) -> Result<(), EventBusError> {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = state.queues.get_mut(&self.queue) else {
            return Err(EventBusError::AckFailed(format!(
                "queue '{}' no longer exists",
                self.queue
            )));
        };
        queue.unacked = queue.unacked.saturating_sub(1);

        match reject {
            None => Ok(()),
            Some(true) => {
                let mut message = self.message.clone();
                message.redelivered = true;
                queue.ready.push_front(message);
                state.dispatch(&self.queue, &self.shared);
                Ok(())
            }
            Some(false) => match queue.dead_letter_exchange.clone() {
                Some(dlx) => state.route(&dlx, self.message.clone(), &self.shared),
                None => Ok(()),
            },
        }
    }
}

impl Acker for InMemoryAcker {
    fn ack(&self) -> AckFuture<'_> {
        Box::pin(async move { self.settle(None) })
    }

    fn reject(&self, requeue: bool) -> AckFuture<'_> {
        Box::pin(async move { self.settle(Some(requeue)) })
    }
}

/// In-memory [`EventBus`] for tests.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Shared,
}

impl InMemoryEventBus {
    /// Create an empty bus. Call [`EventBus::declare`] before publishing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus with `topology` already declared.
    #[must_use]
    pub fn with_topology(topology: &Topology) -> Self {
        let bus = Self::new();
        bus.lock().merge(topology);
        bus
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every message published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Routing keys of every message published so far, in order.
    #[must_use]
    pub fn published_keys(&self) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .map(|p| p.message.routing_key.clone())
            .collect()
    }

    /// Messages waiting in `queue` for a consumer.
    #[must_use]
    pub fn ready_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Payloads waiting in `queue`, oldest first.
    #[must_use]
    pub fn ready_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Manual-ack deliveries handed out but not yet settled.
    #[must_use]
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.unacked)
    }

    /// Make every subsequent publish fail with `reason`, or restore with `None`.
    pub fn fail_publishes(&self, reason: Option<&str>) {
        self.lock().publish_failure = reason.map(str::to_string);
    }

    /// Detach every consumer, ending their streams as a dropped connection would.
    pub fn disconnect_consumers(&self) {
        for queue in self.lock().queues.values_mut() {
            queue.consumer = None;
        }
    }
}

impl EventBus for InMemoryEventBus {
    fn declare(
        &self,
        topology: &Topology,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topology = topology.clone();
        Box::pin(async move {
            self.lock().merge(&topology);
            Ok(())
        })
    }

    fn publish(
        &self,
        exchange: &str,
        message: &Message,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let exchange = exchange.to_string();
        let message = message.clone();
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(reason) = state.publish_failure.clone() {
                return Err(EventBusError::PublishFailed {
                    exchange,
                    routing_key: message.routing_key,
                    reason,
                });
            }

            let stored = StoredMessage {
                routing_key: message.routing_key.clone(),
                payload: message.payload.clone(),
                redelivered: false,
            };
            state.route(&exchange, stored, &self.inner)?;
            state.published.push(PublishedMessage { exchange, message });
            Ok(())
        })
    }

    fn consume(
        &self,
        queue: &str,
        mode: AckMode,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let queue = queue.to_string();
        Box::pin(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            {
                let mut state = self.lock();
                let Some(queue_state) = state.queues.get_mut(&queue) else {
                    return Err(EventBusError::ConsumeFailed {
                        queue,
                        reason: "queue is not declared".to_string(),
                    });
                };
                if queue_state
                    .consumer
                    .as_ref()
                    .is_some_and(|c| !c.sender.is_closed())
                {
                    return Err(EventBusError::ConsumeFailed {
                        queue,
                        reason: "queue already has a consumer".to_string(),
                    });
                }
                queue_state.consumer = Some(Consumer { mode, sender: tx });
                state.dispatch(&queue, &self.inner);
            }

            let stream = async_stream::stream! {
                while let Some(delivery) = rx.recv().await {
                    yield Ok(delivery);
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
