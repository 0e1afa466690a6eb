//! In-process exchange/queue broker.
//!
//! [`LocalBus`] keeps a table of declared exchanges. Every connection owns
//! a bounded queue bound to one exchange with one routing key. Publishing
//! routes a message to every matching queue:
//!
//! - `direct`: the routing key equals the binding key.
//! - `fanout`: every binding.
//! - `topic`: dotted words where `*` matches exactly one word and `#`
//!   matches zero or more.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BusConnection, BusConnector, BusError, ConnectionId};
use crate::domain::{Binding, BusMessage, ExchangeType};

#[derive(Debug)]
struct Queue {
    key: String,
    sender: mpsc::Sender<BusMessage>,
}

#[derive(Debug)]
struct Exchange {
    exchange_type: ExchangeType,
    durable: bool,
    queues: HashMap<ConnectionId, Queue>,
}

impl Exchange {
    fn declaration(&self) -> String {
        declaration(self.exchange_type, self.durable)
    }
}

fn declaration(exchange_type: ExchangeType, durable: bool) -> String {
    if durable {
        format!("durable {exchange_type}")
    } else {
        format!("transient {exchange_type}")
    }
}

#[derive(Debug)]
struct Inner {
    exchanges: Mutex<HashMap<String, Exchange>>,
    next_id: AtomicU64,
    abandoned: AtomicU64,
    queue_capacity: usize,
}

impl Inner {
    fn exchanges(&self) -> MutexGuard<'_, HashMap<String, Exchange>> {
        self.exchanges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unbind(&self, exchange: &str, id: ConnectionId) {
        if let Some(declared) = self.exchanges().get_mut(exchange) {
            declared.queues.remove(&id);
        }
    }
}

/// In-process broker implementing [`BusConnector`].
///
/// Cloning yields another handle to the same broker.
#[derive(Debug, Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    /// Creates an empty broker whose per-connection queues hold up to
    /// `queue_capacity` messages.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                exchanges: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                abandoned: AtomicU64::new(0),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Routes a message to every matching queue of `exchange`.
    ///
    /// Returns the number of queues that accepted it. Queues that are full
    /// drop the message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownExchange`] if the exchange was never
    /// declared.
    pub fn publish(&self, message: &BusMessage) -> Result<usize, BusError> {
        let exchanges = self.inner.exchanges();
        let Some(exchange) = exchanges.get(&message.exchange) else {
            return Err(BusError::UnknownExchange(message.exchange.clone()));
        };

        let mut delivered = 0;
        for (id, queue) in &exchange.queues {
            if !routes(exchange.exchange_type, &queue.key, &message.routing_key) {
                continue;
            }
            match queue.sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection = %id,
                        exchange = %message.exchange,
                        "queue full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        tracing::debug!(
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            delivered,
            "message published"
        );
        Ok(delivered)
    }

    /// Returns the number of live queues bound to `exchange` with `key`.
    #[must_use]
    pub fn binding_count(&self, exchange: &str, key: &str) -> usize {
        self.inner
            .exchanges()
            .get(exchange)
            .map_or(0, |e| e.queues.values().filter(|q| q.key == key).count())
    }

    /// Returns the number of queued messages discarded because their
    /// connection was closed before receiving them.
    #[must_use]
    pub fn abandoned_count(&self) -> u64 {
        self.inner.abandoned.load(Ordering::Relaxed)
    }

    /// Returns the number of live queues across every exchange.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner
            .exchanges()
            .values()
            .map(|e| e.queues.len())
            .sum()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl BusConnector for LocalBus {
    async fn connect(&self, binding: &Binding) -> Result<Box<dyn BusConnection>, BusError> {
        let id = ConnectionId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.inner.queue_capacity);

        {
            let mut exchanges = self.inner.exchanges();
            let exchange = exchanges
                .entry(binding.exchange.clone())
                .or_insert_with(|| Exchange {
                    exchange_type: binding.exchange_type,
                    durable: binding.durable,
                    queues: HashMap::new(),
                });

            let matches = exchange.exchange_type == binding.exchange_type
                && exchange.durable == binding.durable;
            if !matches {
                // Unused declarations may be replaced.
                if !exchange.queues.is_empty() {
                    return Err(BusError::ExchangeMismatch {
                        exchange: binding.exchange.clone(),
                        declared: exchange.declaration(),
                        requested: declaration(binding.exchange_type, binding.durable),
                    });
                }
                exchange.exchange_type = binding.exchange_type;
                exchange.durable = binding.durable;
            }

            exchange.queues.insert(
                id,
                Queue {
                    key: binding.key.clone(),
                    sender,
                },
            );
        }

        tracing::debug!(connection = %id, %binding, "queue bound");
        Ok(Box::new(LocalConnection {
            id,
            exchange: binding.exchange.clone(),
            receiver,
            bus: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

/// A queue on the [`LocalBus`]. Unbinds itself when closed or dropped.
#[derive(Debug)]
struct LocalConnection {
    id: ConnectionId,
    exchange: String,
    receiver: mpsc::Receiver<BusMessage>,
    bus: Arc<Inner>,
    closed: bool,
}

impl LocalConnection {
    /// Unbinds the queue. Messages still queued are counted as abandoned.
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.bus.unbind(&self.exchange, self.id);
        self.receiver.close();

        let mut abandoned = 0u64;
        while self.receiver.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            self.bus.abandoned.fetch_add(abandoned, Ordering::Relaxed);
            tracing::warn!(
                connection = %self.id,
                exchange = %self.exchange,
                abandoned,
                "queue unbound with undelivered messages"
            );
        } else {
            tracing::debug!(connection = %self.id, exchange = %self.exchange, "queue unbound");
        }
    }
}

#[async_trait]
impl BusConnection for LocalConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn receive(&mut self) -> Option<BusMessage> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decides whether a message with `routing_key` reaches a queue bound
/// with `key` on an exchange of the given type.
#[must_use]
pub fn routes(exchange_type: ExchangeType, key: &str, routing_key: &str) -> bool {
    match exchange_type {
        ExchangeType::Direct => key == routing_key,
        ExchangeType::Fanout => true,
        ExchangeType::Topic => {
            let pattern: Vec<&str> = key.split('.').collect();
            let words: Vec<&str> = routing_key.split('.').collect();
            topic_matches(&pattern, &words)
        }
    }
}

fn topic_matches(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => {
            (0..=words.len()).any(|skip| words.get(skip..).is_some_and(|tail| topic_matches(rest, tail)))
        }
        Some((&head, rest)) => match words.split_first() {
            Some((&word, tail)) => (head == "*" || head == word) && topic_matches(rest, tail),
            None => false,
        },
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn binding(exchange: &str, key: &str, exchange_type: ExchangeType) -> Binding {
        Binding {
            exchange: exchange.to_string(),
            key: key.to_string(),
            exchange_type,
            durable: true,
        }
    }

    #[test]
    fn direct_routes_on_exact_key() {
        assert!(routes(ExchangeType::Direct, "important", "important"));
        assert!(!routes(ExchangeType::Direct, "important", "important.more"));
    }

    #[test]
    fn fanout_routes_everything() {
        assert!(routes(ExchangeType::Fanout, "", "anything"));
    }

    #[test]
    fn topic_wildcards() {
        assert!(routes(ExchangeType::Topic, "orders.*", "orders.created"));
        assert!(!routes(ExchangeType::Topic, "orders.*", "orders.created.eu"));
        assert!(routes(ExchangeType::Topic, "orders.#", "orders"));
        assert!(routes(ExchangeType::Topic, "orders.#", "orders.created.eu"));
        assert!(routes(ExchangeType::Topic, "#.eu", "orders.created.eu"));
        assert!(routes(ExchangeType::Topic, "*.created.#", "orders.created"));
        assert!(!routes(ExchangeType::Topic, "*.created", "created"));
    }

    #[tokio::test]
    async fn connection_receives_routed_message() {
        let bus = LocalBus::new(8);
        let Ok(mut conn) = bus
            .connect(&binding("notifications", "important", ExchangeType::Direct))
            .await
        else {
            panic!("connect should succeed");
        };

        let message = BusMessage::new("notifications", "important", "X");
        assert_eq!(bus.publish(&message), Ok(1));
        assert_eq!(
            bus.publish(&BusMessage::new("notifications", "other", "Y")),
            Ok(0)
        );

        let Some(received) = conn.receive().await else {
            panic!("expected a message");
        };
        assert_eq!(received.body, "X");
    }

    #[tokio::test]
    async fn close_unbinds_and_ends_receive() {
        let bus = LocalBus::new(8);
        let Ok(mut conn) = bus
            .connect(&binding("notifications", "important", ExchangeType::Direct))
            .await
        else {
            panic!("connect should succeed");
        };
        assert_eq!(bus.binding_count("notifications", "important"), 1);

        conn.close().await;
        conn.close().await;
        assert_eq!(bus.binding_count("notifications", "important"), 0);
        assert!(conn.receive().await.is_none());
    }

    #[tokio::test]
    async fn close_counts_queued_messages_as_abandoned() {
        let bus = LocalBus::new(8);
        let Ok(mut conn) = bus
            .connect(&binding("notifications", "important", ExchangeType::Direct))
            .await
        else {
            panic!("connect should succeed");
        };
        for body in ["1", "2", "3"] {
            bus.publish(&BusMessage::new("notifications", "important", body)).ok();
        }
        assert!(conn.receive().await.is_some());

        conn.close().await;
        conn.close().await;
        assert_eq!(bus.abandoned_count(), 2);
    }

    #[tokio::test]
    async fn drop_unbinds() {
        let bus = LocalBus::new(8);
        let Ok(conn) = bus.connect(&binding("audit", "", ExchangeType::Fanout)).await else {
            panic!("connect should succeed");
        };
        assert_eq!(bus.connection_count(), 1);
        drop(conn);
        assert_eq!(bus.connection_count(), 0);
    }

    #[tokio::test]
    async fn mismatched_declaration_is_rejected_while_in_use() {
        let bus = LocalBus::new(8);
        let Ok(_conn) = bus
            .connect(&binding("notifications", "a", ExchangeType::Direct))
            .await
        else {
            panic!("connect should succeed");
        };

        let result = bus
            .connect(&binding("notifications", "b.*", ExchangeType::Topic))
            .await;
        assert!(matches!(result, Err(BusError::ExchangeMismatch { .. })));
    }

    #[tokio::test]
    async fn full_queue_drops_message() {
        let bus = LocalBus::new(1);
        let Ok(_conn) = bus
            .connect(&binding("notifications", "k", ExchangeType::Direct))
            .await
        else {
            panic!("connect should succeed");
        };
        assert_eq!(bus.publish(&BusMessage::new("notifications", "k", "1")), Ok(1));
        assert_eq!(bus.publish(&BusMessage::new("notifications", "k", "2")), Ok(0));
    }

    #[test]
    fn publish_to_undeclared_exchange_fails() {
        let bus = LocalBus::new(8);
        assert_eq!(
            bus.publish(&BusMessage::new("nowhere", "k", "x")),
            Err(BusError::UnknownExchange("nowhere".to_string()))
        );
    }

    #[tokio::test]
    async fn connection_ids_are_unique() {
        let bus = LocalBus::new(8);
        let b = binding("notifications", "k", ExchangeType::Direct);
        let (Ok(a), Ok(c)) = (bus.connect(&b).await, bus.connect(&b).await) else {
            panic!("connect should succeed");
        };
        assert_ne!(a.id(), c.id());
    }
}
