//! Map of live consumers with per-filter serialization.
//!
//! [`ConsumerRegistry`] stores one entry per filter in a `HashMap` guarded
//! by a short-held `std::sync::Mutex`. Each entry has a slot protected by a
//! [`tokio::sync::Mutex`], held for the whole of a reconcile step
//! (including bus I/O), so operations on the same filter are serialized
//! while different filters proceed concurrently.
//!
//! Each entry also publishes a read-only view of its consumer through a
//! `watch` channel. Listing consumers reads those views and never waits on
//! a slot.
//!
//! A slot that ends a step without a consumer is retired and removed from
//! the map. Callers that were queued on a retired slot retry with a fresh
//! one, so no registry entry ever outlives its consumer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use utoipa::ToSchema;

use super::consumer::{BusConsumer, ConsumerState};
use super::snapshot::SubscriberSnapshot;
use crate::bus::ConnectionId;
use crate::domain::{Binding, FilterId};

#[derive(Debug, Default)]
struct Slot {
    consumer: Option<BusConsumer>,
    retired: bool,
}

/// Lock-free view of an installed consumer.
#[derive(Debug, Clone)]
struct ConsumerView {
    filter_id: FilterId,
    binding: Binding,
    connection_id: ConnectionId,
    state: watch::Receiver<ConsumerState>,
    snapshot: watch::Receiver<Arc<SubscriberSnapshot>>,
}

impl ConsumerView {
    fn of(consumer: &BusConsumer) -> Self {
        Self {
            filter_id: consumer.filter_id(),
            binding: consumer.binding().clone(),
            connection_id: consumer.connection_id(),
            state: consumer.watch_state(),
            snapshot: consumer.watch_snapshot(),
        }
    }

    fn info(&self) -> ConsumerInfo {
        ConsumerInfo {
            filter_id: self.filter_id,
            binding: self.binding.clone(),
            state: *self.state.borrow(),
            connection_id: self.connection_id,
            subscriber_count: self.snapshot.borrow().len(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Arc<Mutex<Slot>>,
    view: Arc<watch::Sender<Option<ConsumerView>>>,
}

impl Default for Entry {
    fn default() -> Self {
        let (view, _) = watch::channel(None);
        Self {
            slot: Arc::default(),
            view: Arc::new(view),
        }
    }
}

type EntryMap = HashMap<FilterId, Entry>;

/// Summary of one live consumer for the consumers endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConsumerInfo {
    /// Filter served by the consumer.
    pub filter_id: FilterId,
    /// Bus binding.
    pub binding: Binding,
    /// Lifecycle state.
    pub state: ConsumerState,
    /// Bus connection identity.
    pub connection_id: ConnectionId,
    /// Subscribers in the current snapshot.
    pub subscriber_count: usize,
}

impl From<&BusConsumer> for ConsumerInfo {
    fn from(consumer: &BusConsumer) -> Self {
        ConsumerView::of(consumer).info()
    }
}

/// Registry of running consumers keyed by filter.
#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    entries: StdMutex<EntryMap>,
}

impl ConsumerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, EntryMap> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires exclusive access to the slot of `filter_id`, creating it if
    /// needed. Waits while another task holds it.
    pub async fn lock(&self, filter_id: FilterId) -> FilterSlot<'_> {
        loop {
            let entry = self.entries().entry(filter_id).or_default().clone();
            let guard = Arc::clone(&entry.slot).lock_owned().await;
            if !guard.retired {
                return FilterSlot {
                    registry: self,
                    filter_id,
                    entry,
                    guard,
                };
            }
        }
    }

    /// Returns the filters that currently have a slot.
    #[must_use]
    pub fn filter_ids(&self) -> Vec<FilterId> {
        self.entries().keys().copied().collect()
    }

    /// Returns a summary of every live consumer, ordered by filter id.
    ///
    /// Never waits on a reconcile in progress.
    #[must_use]
    pub fn list(&self) -> Vec<ConsumerInfo> {
        let mut infos: Vec<ConsumerInfo> = self
            .entries()
            .values()
            .filter_map(|entry| Option::as_ref(&entry.view.borrow()).map(ConsumerView::info))
            .collect();
        infos.sort_by_key(|info| info.filter_id);
        infos
    }

    /// Returns the summary of the consumer serving `filter_id`, if any.
    #[must_use]
    pub fn get(&self, filter_id: FilterId) -> Option<ConsumerInfo> {
        self.entries()
            .get(&filter_id)
            .and_then(|entry| Option::as_ref(&entry.view.borrow()).map(ConsumerView::info))
    }

    /// Returns the number of live consumers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .filter(|entry| entry.view.borrow().is_some())
            .count()
    }

    /// Returns `true` if no consumer is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every consumer from the registry and returns them.
    pub async fn drain(&self) -> Vec<BusConsumer> {
        let mut consumers = Vec::new();
        for filter_id in self.filter_ids() {
            let mut slot = self.lock(filter_id).await;
            if let Some(consumer) = slot.take() {
                consumers.push(consumer);
            }
        }
        consumers
    }

    fn retire(&self, filter_id: FilterId, slot: &Arc<Mutex<Slot>>) {
        let mut entries = self.entries();
        if entries
            .get(&filter_id)
            .is_some_and(|current| Arc::ptr_eq(&current.slot, slot))
        {
            entries.remove(&filter_id);
        }
    }
}

/// Exclusive access to one filter's registry entry.
///
/// Dropping a slot that holds no consumer removes the entry.
#[derive(Debug)]
pub struct FilterSlot<'a> {
    registry: &'a ConsumerRegistry,
    filter_id: FilterId,
    entry: Entry,
    guard: OwnedMutexGuard<Slot>,
}

impl FilterSlot<'_> {
    /// Filter this slot belongs to.
    #[must_use]
    pub const fn filter_id(&self) -> FilterId {
        self.filter_id
    }

    /// The installed consumer, if any.
    #[must_use]
    pub fn consumer(&self) -> Option<&BusConsumer> {
        self.guard.consumer.as_ref()
    }

    /// Installs `consumer`, returning the one it replaces.
    pub fn install(&mut self, consumer: BusConsumer) -> Option<BusConsumer> {
        self.entry.view.send_replace(Some(ConsumerView::of(&consumer)));
        self.guard.consumer.replace(consumer)
    }

    /// Removes and returns the installed consumer.
    pub fn take(&mut self) -> Option<BusConsumer> {
        self.entry.view.send_replace(None);
        self.guard.consumer.take()
    }
}

impl Drop for FilterSlot<'_> {
    fn drop(&mut self) {
        if self.guard.consumer.is_none() {
            self.guard.retired = true;
            self.registry.retire(self.filter_id, &self.entry.slot);
        }
    }
}
