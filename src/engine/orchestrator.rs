//! Reconciliation of the consumer registry against the subscription store.
//!
//! The [`Orchestrator`] keeps exactly one [`BusConsumer`] per filter that
//! has at least one subscriber. It is driven by three inputs, all funneled
//! through one bounded queue:
//!
//! - subscription changes read from the store's change feed by a dedicated
//!   reader task,
//! - a full resync when that reader falls behind,
//! - explicit reconcile requests for a filter whose row was edited.
//!
//! Every input resolves to one or more calls of
//! [`Orchestrator::reconcile_filter`], which recomputes the filter's
//! subscriber set from the store and spawns, refreshes, rebinds or stops
//! its consumer accordingly.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::consumer::{BusConsumer, ConsumerError};
use super::dispatcher::Dispatcher;
use super::registry::{ConsumerInfo, ConsumerRegistry};
use super::snapshot::SubscriberSnapshot;
use crate::bus::{BusConnector, ConnectionId};
use crate::domain::{ChangeStream, FeedError, FilterId, SubscriptionChange};
use crate::store::{FilterStore, StoreError, Stores, SubscriptionStore};

/// Fatal orchestrator failures.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The subscription change feed closed.
    #[error("subscription store disconnected")]
    StoreDisconnect,

    /// The initial read of the subscription store failed.
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[source] StoreError),

    /// [`Orchestrator::run`] was called twice.
    #[error("orchestrator is already running")]
    AlreadyRunning,
}

/// Non-fatal failure of a single reconcile step.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Subscriptions reference a filter that no longer exists.
    #[error("filter {0} is referenced by subscriptions but does not exist")]
    ConfigurationRace(FilterId),

    /// A store read failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The consumer could not be started.
    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    /// [`Orchestrator::shutdown`] was called; no consumer is started.
    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

/// What a reconcile step did to a filter's consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A consumer was started on a new connection.
    Spawned(ConnectionId),
    /// The running consumer received a new snapshot.
    Refreshed,
    /// The binding changed; the consumer was restarted on a new connection.
    Rebound(ConnectionId),
    /// The last subscriber left; the consumer was stopped.
    Stopped,
    /// No subscribers and no consumer; nothing to do.
    Inactive,
}

/// Input of the reconcile loop.
#[derive(Debug)]
enum Request {
    Change(SubscriptionChange),
    Resync,
    FilterChanged(FilterId),
    FeedClosed,
}

/// Owns the consumer registry and keeps it in line with the stores.
#[derive(Debug)]
pub struct Orchestrator {
    subscriptions: Arc<dyn SubscriptionStore>,
    filters: Arc<dyn FilterStore>,
    connector: Arc<dyn BusConnector>,
    dispatcher: Dispatcher,
    registry: ConsumerRegistry,
    requests: mpsc::Sender<Request>,
    inbox: Mutex<Option<mpsc::Receiver<Request>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Orchestrator {
    /// Creates an orchestrator. Nothing runs until [`Orchestrator::run`].
    #[must_use]
    pub fn new(
        stores: &Stores,
        connector: Arc<dyn BusConnector>,
        dispatcher: Dispatcher,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let (requests, inbox) = mpsc::channel(queue_capacity.max(1));
        Arc::new(Self {
            subscriptions: Arc::clone(&stores.subscriptions),
            filters: Arc::clone(&stores.filters),
            connector,
            dispatcher,
            registry: ConsumerRegistry::new(),
            requests,
            inbox: Mutex::new(Some(inbox)),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// The consumer registry.
    #[must_use]
    pub const fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    /// Summaries of every live consumer.
    #[must_use]
    pub fn consumers(&self) -> Vec<ConsumerInfo> {
        self.registry.list()
    }

    /// Brings the consumer of `filter_id` in line with the stores.
    ///
    /// Idempotent: the outcome only depends on the current store contents.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ConfigurationRace`] when subscriptions
    /// reference a missing filter, and a store or consumer error when a
    /// read or the bus binding fails. In these cases the filter is left
    /// without a consumer. After [`Orchestrator::shutdown`] it returns
    /// [`ReconcileError::ShuttingDown`] and changes nothing.
    pub async fn reconcile_filter(&self, filter_id: FilterId) -> Result<Reconciled, ReconcileError> {
        let mut slot = self.registry.lock(filter_id).await;
        if self.shutdown.is_cancelled() {
            return Err(ReconcileError::ShuttingDown);
        }

        let details = self.subscriptions.subscribers_of(filter_id).await?;
        if details.is_empty() {
            return Ok(match slot.take() {
                Some(consumer) => {
                    consumer.stop().await;
                    Reconciled::Stopped
                }
                None => Reconciled::Inactive,
            });
        }

        let Some(filter) = self.filters.get_filter(filter_id).await? else {
            if let Some(consumer) = slot.take() {
                consumer.stop().await;
            }
            return Err(ReconcileError::ConfigurationRace(filter_id));
        };

        let binding = filter.binding();
        let snapshot = SubscriberSnapshot::new(filter, details);
        let (reusable, rebinding) = match slot.consumer() {
            Some(consumer) => {
                let same = *consumer.binding() == binding;
                (same && consumer.is_listening(), !same)
            }
            None => (false, false),
        };

        if reusable {
            if let Some(consumer) = slot.consumer() {
                consumer.refresh(snapshot);
            }
            return Ok(Reconciled::Refreshed);
        }

        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        let consumer =
            BusConsumer::spawn(self.connector.as_ref(), self.dispatcher.clone(), snapshot).await?;
        let connection_id = consumer.connection_id();
        slot.install(consumer);

        Ok(if rebinding {
            Reconciled::Rebound(connection_id)
        } else {
            Reconciled::Spawned(connection_id)
        })
    }

    /// Starts a consumer for every filter that has subscribers.
    ///
    /// Returns the number of live consumers afterwards. Failures of single
    /// filters are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Bootstrap`] if the subscription list
    /// cannot be read.
    pub async fn bootstrap(&self) -> Result<usize, OrchestratorError> {
        let subscriptions = self
            .subscriptions
            .list_all()
            .await
            .map_err(OrchestratorError::Bootstrap)?;
        let filter_ids: BTreeSet<FilterId> =
            subscriptions.iter().map(|s| s.filter_id).collect();

        for filter_id in filter_ids {
            self.reconcile_logged(filter_id).await;
        }

        let live = self.registry.len();
        tracing::info!(consumers = live, "bootstrap complete");
        Ok(live)
    }

    /// Subscribes to the change feed, bootstraps the registry and processes
    /// changes until [`Orchestrator::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::StoreDisconnect`] when the change feed
    /// closes, [`OrchestratorError::Bootstrap`] if the initial read fails
    /// and [`OrchestratorError::AlreadyRunning`] on a second call.
    pub async fn run(self: Arc<Self>) -> Result<(), OrchestratorError> {
        let Some(mut inbox) = self.inbox.lock().await.take() else {
            return Err(OrchestratorError::AlreadyRunning);
        };

        // Subscribe before the bootstrap read so no change falls in between.
        let changes = self.subscriptions.changes();
        let reader = tokio::spawn(read_feed(
            changes,
            self.requests.clone(),
            self.shutdown.clone(),
        ));

        if let Err(e) = self.bootstrap().await {
            reader.abort();
            return Err(e);
        }

        let result = loop {
            let request = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break Ok(()),
                request = inbox.recv() => request,
            };

            match request {
                Some(Request::Change(change)) => {
                    for filter_id in change.affected_filters() {
                        self.spawn_reconcile(filter_id);
                    }
                }
                Some(Request::FilterChanged(filter_id)) => self.spawn_reconcile(filter_id),
                Some(Request::Resync) => self.resync().await,
                Some(Request::FeedClosed) | None => {
                    tracing::error!("subscription change feed closed");
                    break Err(OrchestratorError::StoreDisconnect);
                }
            }
        };

        reader.abort();
        result
    }

    /// Queues a reconcile of `filter_id`, e.g. after its row was edited.
    pub async fn request_reconcile(&self, filter_id: FilterId) {
        if self
            .requests
            .send(Request::FilterChanged(filter_id))
            .await
            .is_err()
        {
            tracing::warn!(%filter_id, "reconcile queue closed");
        }
    }

    /// Stops the reconcile loop, waits for reconciles in flight and stops
    /// every consumer.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        let consumers = self.registry.drain().await;
        let count = consumers.len();
        for consumer in consumers {
            consumer.stop().await;
        }
        tracing::info!(consumers = count, "orchestrator shut down");
    }

    fn spawn_reconcile(self: &Arc<Self>, filter_id: FilterId) {
        let this = Arc::clone(self);
        self.tasks
            .spawn(async move { this.reconcile_logged(filter_id).await });
    }

    async fn reconcile_logged(&self, filter_id: FilterId) {
        match self.reconcile_filter(filter_id).await {
            Ok(Reconciled::Spawned(connection)) => {
                tracing::info!(%filter_id, %connection, "consumer spawned");
            }
            Ok(Reconciled::Rebound(connection)) => {
                tracing::info!(%filter_id, %connection, "consumer rebound");
            }
            Ok(outcome) => tracing::debug!(%filter_id, ?outcome, "filter reconciled"),
            Err(ReconcileError::ConfigurationRace(_)) => {
                tracing::warn!(%filter_id, "filter vanished while referenced, no consumer");
            }
            Err(ReconcileError::ShuttingDown) => {
                tracing::debug!(%filter_id, "reconcile skipped during shutdown");
            }
            Err(e) => tracing::warn!(%filter_id, error = %e, "reconcile failed"),
        }
    }

    /// Reconciles every filter known to the store or the registry.
    async fn resync(self: &Arc<Self>) {
        let mut filter_ids: BTreeSet<FilterId> = self.registry.filter_ids().into_iter().collect();
        match self.subscriptions.list_all().await {
            Ok(subscriptions) => filter_ids.extend(subscriptions.iter().map(|s| s.filter_id)),
            Err(e) => tracing::warn!(error = %e, "resync could not list subscriptions"),
        }
        tracing::info!(filters = filter_ids.len(), "resyncing after change feed lag");
        for filter_id in filter_ids {
            self.spawn_reconcile(filter_id);
        }
    }
}

/// Forwards change-feed events onto the reconcile queue.
async fn read_feed(
    mut changes: ChangeStream,
    requests: mpsc::Sender<Request>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            event = changes.next() => event,
        };
        let request = match event {
            Ok(change) => Request::Change(change),
            Err(FeedError::Lagged(dropped)) => {
                tracing::warn!(dropped, "change feed lagged");
                Request::Resync
            }
            Err(FeedError::Closed) => Request::FeedClosed,
        };
        let closed = matches!(request, Request::FeedClosed);
        if requests.send(request).await.is_err() || closed {
            return;
        }
    }
}
