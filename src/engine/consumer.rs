//! One bus connection serving one filter.
//!
//! A [`BusConsumer`] owns a spawned receive loop. The loop reads the latest
//! [`SubscriberSnapshot`] through a `watch` channel for every inbound
//! message and fans it out through the [`Dispatcher`]. Replacing the
//! snapshot never touches the connection; only [`BusConsumer::stop`]
//! closes it.
//!
//! ```text
//! Created -> Connecting -> Listening -> Stopping -> Stopped
//! ```
//!
//! A consumer also reaches `Stopped` on its own when the bus closes the
//! connection.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::dispatcher::Dispatcher;
use super::snapshot::SubscriberSnapshot;
use crate::bus::{BusConnection, BusConnector, BusError, ConnectionId};
use crate::domain::{Binding, FilterId};

/// Lifecycle of a [`BusConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// Constructed, not yet connecting.
    Created,
    /// Binding to the bus.
    Connecting,
    /// Receive loop running.
    Listening,
    /// Stop requested; the loop is winding down.
    Stopping,
    /// Connection released.
    Stopped,
}

/// Errors raised while starting a consumer.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The bus refused the binding.
    #[error("failed to bind {binding}: {source}")]
    Connect {
        /// Requested binding.
        binding: Binding,
        /// Bus failure.
        #[source]
        source: BusError,
    },
}

/// Handle to a running receive loop bound to one filter.
#[derive(Debug)]
pub struct BusConsumer {
    filter_id: FilterId,
    binding: Binding,
    connection_id: ConnectionId,
    state: Arc<watch::Sender<ConsumerState>>,
    snapshot: watch::Sender<Arc<SubscriberSnapshot>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BusConsumer {
    /// Binds to the snapshot filter's exchange and starts the receive loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Connect`] if the bus refuses the binding.
    pub async fn spawn(
        connector: &dyn BusConnector,
        dispatcher: Dispatcher,
        snapshot: SubscriberSnapshot,
    ) -> Result<Self, ConsumerError> {
        let filter_id = snapshot.filter.id;
        let binding = snapshot.filter.binding();
        let (state, _) = watch::channel(ConsumerState::Created);
        let state = Arc::new(state);

        state.send_replace(ConsumerState::Connecting);
        let connection = match connector.connect(&binding).await {
            Ok(connection) => connection,
            Err(source) => {
                state.send_replace(ConsumerState::Stopped);
                return Err(ConsumerError::Connect { binding, source });
            }
        };
        let connection_id = connection.id();

        let (snapshot, snapshot_rx) = watch::channel(Arc::new(snapshot));
        let cancel = CancellationToken::new();
        state.send_replace(ConsumerState::Listening);

        let task = tokio::spawn(receive_loop(
            filter_id,
            connection,
            snapshot_rx,
            dispatcher,
            cancel.clone(),
            Arc::clone(&state),
        ));
        tracing::info!(%filter_id, %binding, connection = %connection_id, "consumer listening");

        Ok(Self {
            filter_id,
            binding,
            connection_id,
            state,
            snapshot,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Filter this consumer serves.
    #[must_use]
    pub const fn filter_id(&self) -> FilterId {
        self.filter_id
    }

    /// Binding the connection was opened with.
    #[must_use]
    pub const fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Identity of the underlying bus connection.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Returns a receiver observing lifecycle transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Returns `true` while the receive loop is listening.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state() == ConsumerState::Listening
    }

    /// Returns the snapshot the next message will be dispatched with.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SubscriberSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Returns a receiver observing snapshot replacements.
    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<SubscriberSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Number of subscribers in the current snapshot.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.snapshot.borrow().len()
    }

    /// Atomically replaces the subscriber snapshot. Does not reconnect.
    pub fn refresh(&self, snapshot: SubscriberSnapshot) {
        let count = snapshot.len();
        self.snapshot.send_replace(Arc::new(snapshot));
        tracing::debug!(filter_id = %self.filter_id, subscribers = count, "snapshot refreshed");
    }

    /// Stops the receive loop and waits until the connection is released.
    ///
    /// Idempotent: later and concurrent calls return once the first has
    /// completed.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return;
        };

        self.state.send_if_modified(|state| {
            if *state == ConsumerState::Listening {
                *state = ConsumerState::Stopping;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();

        if let Err(e) = handle.await {
            tracing::error!(filter_id = %self.filter_id, error = %e, "consumer task failed");
            self.state.send_replace(ConsumerState::Stopped);
        }
        tracing::info!(filter_id = %self.filter_id, connection = %self.connection_id, "consumer stopped");
    }
}

impl Drop for BusConsumer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(
    filter_id: FilterId,
    mut connection: Box<dyn BusConnection>,
    snapshot: watch::Receiver<Arc<SubscriberSnapshot>>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConsumerState>>,
) {
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = connection.receive() => received,
        };
        let Some(message) = received else {
            tracing::warn!(%filter_id, "bus closed the connection");
            break;
        };

        let current = Arc::clone(&snapshot.borrow());
        tracing::debug!(
            %filter_id,
            routing_key = %message.routing_key,
            subscribers = current.len(),
            "message received"
        );
        dispatcher.fan_out(&current, message);
    }

    connection.close().await;
    state.send_replace(ConsumerState::Stopped);
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::LocalBus;
    use crate::domain::{BusFilter, BusMessage, ExchangeType, SubscriptionId, User, UserId};
    use crate::engine::snapshot::Subscriber;
    use crate::store::MemoryStore;
    use crate::transport::MemoryTransport;

    fn snapshot(emails: &[&str]) -> SubscriberSnapshot {
        SubscriberSnapshot {
            filter: BusFilter {
                id: FilterId::new(),
                exchange: "notifications".to_string(),
                key: "important".to_string(),
                exchange_type: ExchangeType::Direct,
                durable: true,
                description: None,
                category: None,
                template_id: None,
            },
            subscribers: emails
                .iter()
                .map(|email| Subscriber {
                    subscription_id: SubscriptionId::new(),
                    user: User {
                        id: UserId::new(),
                        name: (*email).to_string(),
                        email: (*email).to_string(),
                    },
                    template_id: None,
                })
                .collect(),
        }
    }

    fn dispatcher(transport: &MemoryTransport) -> Dispatcher {
        Dispatcher::new(
            Arc::new(MemoryStore::default()),
            Arc::new(transport.clone()),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let bus = LocalBus::new(16);
        let transport = MemoryTransport::new();
        let Ok(consumer) =
            BusConsumer::spawn(&bus, dispatcher(&transport), snapshot(&["a@x", "b@x"])).await
        else {
            panic!("spawn should succeed");
        };
        assert_eq!(consumer.state(), ConsumerState::Listening);

        assert_eq!(bus.publish(&BusMessage::new("notifications", "important", "X")), Ok(1));
        let deliveries = transport.wait_for(2).await;
        assert!(deliveries.iter().all(|d| d.body == "X"));
        consumer.stop().await;
    }

    #[tokio::test]
    async fn refresh_keeps_connection() {
        let bus = LocalBus::new(16);
        let transport = MemoryTransport::new();
        let initial = snapshot(&["a@x"]);
        let mut updated = snapshot(&["a@x", "b@x"]);
        updated.filter = initial.filter.clone();

        let Ok(consumer) = BusConsumer::spawn(&bus, dispatcher(&transport), initial).await else {
            panic!("spawn should succeed");
        };
        let before = consumer.connection_id();
        consumer.refresh(updated);

        assert_eq!(consumer.connection_id(), before);
        assert_eq!(consumer.subscriber_count(), 2);
        assert_eq!(bus.binding_count("notifications", "important"), 1);

        bus.publish(&BusMessage::new("notifications", "important", "Y")).ok();
        assert_eq!(transport.wait_for(2).await.len(), 2);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_binding() {
        let bus = LocalBus::new(16);
        let transport = MemoryTransport::new();
        let Ok(consumer) = BusConsumer::spawn(&bus, dispatcher(&transport), snapshot(&["a@x"])).await
        else {
            panic!("spawn should succeed");
        };

        consumer.stop().await;
        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(bus.binding_count("notifications", "important"), 0);
    }

    #[tokio::test]
    async fn stop_accounts_for_every_queued_message() {
        let bus = LocalBus::new(64);
        let transport = MemoryTransport::new();
        let Ok(consumer) = BusConsumer::spawn(&bus, dispatcher(&transport), snapshot(&["a@x"])).await
        else {
            panic!("spawn should succeed");
        };

        let published = 32;
        for i in 0..published {
            assert_eq!(
                bus.publish(&BusMessage::new("notifications", "important", i.to_string())),
                Ok(1)
            );
        }
        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Stopped);

        // Sends spawned before the stop still complete.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let delivered = transport.len().await as u64;
        assert_eq!(delivered + bus.abandoned_count(), published);
    }

    #[tokio::test]
    async fn failed_bind_is_a_connect_error() {
        let bus = LocalBus::new(16);
        let transport = MemoryTransport::new();
        let Ok(first) = BusConsumer::spawn(&bus, dispatcher(&transport), snapshot(&["a@x"])).await
        else {
            panic!("spawn should succeed");
        };

        let mut conflicting = snapshot(&["b@x"]);
        conflicting.filter.exchange_type = ExchangeType::Fanout;
        let result = BusConsumer::spawn(&bus, dispatcher(&transport), conflicting).await;
        assert!(matches!(result, Err(ConsumerError::Connect { .. })));
        first.stop().await;
    }
}
