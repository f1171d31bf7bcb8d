//! Exchange, queue and binding declarations for order events.
//!
//! [`Topology::order_events`] describes the broker layout both services
//! declare at startup: one durable topic exchange and one durable queue per
//! event type, bound 1:1 by routing key. [`Topology::with_dead_letter`] adds a
//! fanout dead-letter exchange that parks rejected messages.

use crate::event::EventType;

/// Topic exchange carrying every order event.
pub const ORDER_EVENTS_EXCHANGE: &str = "order.events";

/// Fanout exchange receiving rejected order events.
pub const DEAD_LETTER_EXCHANGE: &str = "order.events.dlx";

/// Queue bound to [`DEAD_LETTER_EXCHANGE`].
pub const DEAD_LETTER_QUEUE: &str = "queue_order_dead_letter";

/// Exchange routing behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Route on dot-separated patterns with `*` and `#` wildcards.
    Topic,
    /// Route on exact key equality.
    Direct,
    /// Route to every bound queue regardless of key.
    Fanout,
}

/// An exchange declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeSpec {
    /// Exchange name.
    pub name: String,
    /// Routing behaviour.
    pub kind: ExchangeKind,
    /// Survives a broker restart.
    pub durable: bool,
}

/// A queue declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name.
    pub name: String,
    /// Survives a broker restart.
    pub durable: bool,
    /// Where rejected messages are forwarded.
    pub dead_letter_exchange: Option<String>,
}

/// Binds a queue to an exchange under a binding key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingSpec {
    /// Destination queue.
    pub queue: String,
    /// Source exchange.
    pub exchange: String,
    /// Pattern (topic), exact key (direct) or ignored (fanout).
    pub binding_key: String,
}

/// A complete set of declarations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topology {
    /// Exchanges to declare.
    pub exchanges: Vec<ExchangeSpec>,
    /// Queues to declare.
    pub queues: Vec<QueueSpec>,
    /// Bindings to create after exchanges and queues exist.
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    /// The order events layout: exchange `order.events` plus six durable
    /// queues, each bound with its event's routing key.
    #[must_use]
    pub fn order_events() -> Self {
        let exchanges = vec![ExchangeSpec {
            name: ORDER_EVENTS_EXCHANGE.to_string(),
            kind: ExchangeKind::Topic,
            durable: true,
        }];

        let queues = EventType::ALL
            .iter()
            .map(|event| QueueSpec {
                name: event.queue_name().to_string(),
                durable: true,
                dead_letter_exchange: None,
            })
            .collect();

        let bindings = EventType::ALL
            .iter()
            .map(|event| BindingSpec {
                queue: event.queue_name().to_string(),
                exchange: ORDER_EVENTS_EXCHANGE.to_string(),
                binding_key: event.routing_key().to_string(),
            })
            .collect();

        Self {
            exchanges,
            queues,
            bindings,
        }
    }

    /// Route rejected messages from every existing queue into
    /// [`DEAD_LETTER_QUEUE`] through a fanout exchange.
    #[must_use]
    pub fn with_dead_letter(mut self) -> Self {
        for queue in &mut self.queues {
            queue.dead_letter_exchange = Some(DEAD_LETTER_EXCHANGE.to_string());
        }
        self.exchanges.push(ExchangeSpec {
            name: DEAD_LETTER_EXCHANGE.to_string(),
            kind: ExchangeKind::Fanout,
            durable: true,
        });
        self.queues.push(QueueSpec {
            name: DEAD_LETTER_QUEUE.to_string(),
            durable: true,
            dead_letter_exchange: None,
        });
        self.bindings.push(BindingSpec {
            queue: DEAD_LETTER_QUEUE.to_string(),
            exchange: DEAD_LETTER_EXCHANGE.to_string(),
            binding_key: String::new(),
        });
        self
    }

    /// Look up an exchange by name.
    #[must_use]
    pub fn exchange(&self, name: &str) -> Option<&ExchangeSpec> {
        self.exchanges.iter().find(|e| e.name == name)
    }

    /// Look up a queue by name.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Queues a message published to `exchange` with `routing_key` lands in.
    ///
    /// Each queue appears at most once even if several bindings match.
    #[must_use]
    pub fn route(&self, exchange: &str, routing_key: &str) -> Vec<&str> {
        let Some(spec) = self.exchange(exchange) else {
            return Vec::new();
        };

        let mut queues: Vec<&str> = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.exchange == exchange) {
            let matched = match spec.kind {
                ExchangeKind::Fanout => true,
                ExchangeKind::Direct => binding.binding_key == routing_key,
                ExchangeKind::Topic => topic_matches(&binding.binding_key, routing_key),
            };
            if matched && !queues.contains(&binding.queue.as_str()) {
                queues.push(&binding.queue);
            }
        }
        queues
    }
}

/// AMQP topic matching: `*` matches exactly one word, `#` zero or more.
#[must_use]
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = if routing_key.is_empty() {
        Vec::new()
    } else {
        routing_key.split('.').collect()
    };
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) => (word == "*" || word == head) && match_words(rest, tail),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn order_events_declares_six_bound_queues() {
        let topology = Topology::order_events();
        assert_eq!(topology.exchanges.len(), 1);
        assert_eq!(topology.queues.len(), 6);
        assert!(topology.queues.iter().all(|q| q.durable));
        assert_eq!(
            topology.exchange(ORDER_EVENTS_EXCHANGE).map(|e| e.kind),
            Some(ExchangeKind::Topic)
        );

        for event in EventType::ALL {
            assert_eq!(
                topology.route(ORDER_EVENTS_EXCHANGE, event.routing_key()),
                vec![event.queue_name()]
            );
        }
    }

    #[test]
    fn created_routes_to_created_queue_only() {
        let topology = Topology::order_events();
        assert_eq!(
            topology.route(ORDER_EVENTS_EXCHANGE, "order.created"),
            vec!["queue_order_created"]
        );
        let unbound = topology.route(ORDER_EVENTS_EXCHANGE, "order.refunded");
        assert!(unbound.is_empty());
        assert!(topology.route("missing", "order.created").is_empty());
    }

    #[test]
    fn dead_letter_adds_fanout_and_marks_queues() {
        let topology = Topology::order_events().with_dead_letter();
        assert!(
            topology
                .queues
                .iter()
                .filter(|q| q.name != DEAD_LETTER_QUEUE)
                .all(|q| q.dead_letter_exchange.as_deref() == Some(DEAD_LETTER_EXCHANGE))
        );
        assert_eq!(
            topology.route(DEAD_LETTER_EXCHANGE, "order.cancelled"),
            vec![DEAD_LETTER_QUEUE]
        );
    }

    #[test]
    fn topic_wildcards() {
        assert!(topic_matches("order.*", "order.created"));
        assert!(!topic_matches("order.*", "order.created.v2"));
        assert!(!topic_matches("order.*", "order"));
        assert!(topic_matches("order.#", "order"));
        assert!(topic_matches("order.#", "order.created.v2"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("*.created", "order.created"));
        assert!(topic_matches("#.created", "a.b.created"));
        assert!(!topic_matches("order.created", "order.cancelled"));
    }

    proptest! {
        #[test]
        fn literal_pattern_matches_itself(words in proptest::collection::vec("[a-z]{1,6}", 1..5)) {
            let key = words.join(".");
            prop_assert!(topic_matches(&key, &key));
            prop_assert!(topic_matches("#", &key));
        }
    }
}
