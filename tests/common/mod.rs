//! Shared harness for the integration tests.

#![allow(dead_code, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use busnotify::bus::LocalBus;
use busnotify::domain::{
    ExchangeType, FilterId, NewBusFilter, NewSubscription, NewTemplate, NewUser, Subscription,
    Template, TemplateId, User,
};
use busnotify::engine::{ConsumerInfo, Dispatcher, Orchestrator, OrchestratorError};
use busnotify::service::AdminService;
use busnotify::store::{FilterStore, MemoryStore, Stores, SubscriptionStore, TemplateStore, UserStore};
use busnotify::transport::{Delivery, MemoryTransport};

/// Upper bound on every wait in the integration tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// A running router backed by the in-memory store, the local bus and the
/// in-memory transport.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub bus: LocalBus,
    pub transport: MemoryTransport,
    pub orchestrator: Arc<Orchestrator>,
    pub service: AdminService,
    engine: JoinHandle<Result<(), OrchestratorError>>,
}

impl Harness {
    /// Wires the components and starts the orchestrator.
    pub async fn start() -> Self {
        let store = Arc::new(MemoryStore::default());
        let stores = Stores::from_backend(&store);
        let bus = LocalBus::new(64);
        let transport = MemoryTransport::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&stores.templates),
            Arc::new(transport.clone()),
            Duration::from_secs(1),
        );
        let orchestrator = Orchestrator::new(&stores, Arc::new(bus.clone()), dispatcher, 64);
        let service = AdminService::new(stores, Arc::clone(&orchestrator), bus.clone());
        let engine = tokio::spawn(Arc::clone(&orchestrator).run());

        // The run loop subscribes to the change feed before bootstrapping.
        let deadline = tokio::time::Instant::now() + WAIT;
        while store.feed().receiver_count() == 0 {
            if tokio::time::Instant::now() >= deadline {
                panic!("orchestrator did not subscribe to the change feed");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        Self {
            store,
            bus,
            transport,
            orchestrator,
            service,
            engine,
        }
    }

    /// Stops every consumer and the orchestrator loop.
    pub async fn stop(self) {
        self.orchestrator.shutdown().await;
        let _ = tokio::time::timeout(WAIT, self.engine).await;
    }

    pub async fn user(&self, name: &str) -> User {
        let Ok(user) = self
            .store
            .insert_user(NewUser {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
            })
            .await
        else {
            panic!("user insert failed");
        };
        user
    }

    pub async fn filter(&self, exchange: &str, key: &str, exchange_type: ExchangeType) -> FilterId {
        let Ok(inserted) = self
            .store
            .insert_filter(filter(exchange, key, exchange_type))
            .await
        else {
            panic!("filter insert failed");
        };
        inserted.id()
    }

    pub async fn template(&self, name: &str, text: &str) -> Template {
        let Ok(template) = self
            .store
            .insert_template(NewTemplate {
                name: name.to_string(),
                text: text.to_string(),
            })
            .await
        else {
            panic!("template insert failed");
        };
        template
    }

    pub async fn subscribe(
        &self,
        user: &User,
        filter_id: FilterId,
        template_id: Option<TemplateId>,
    ) -> Subscription {
        let Ok(subscription) = self
            .store
            .insert_subscription(NewSubscription {
                user_id: user.id,
                filter_id,
                template_id,
            })
            .await
        else {
            panic!("subscription insert failed");
        };
        subscription
    }

    /// Polls the registry until `pred` holds for the entry of `filter_id`.
    pub async fn wait_consumer<P>(&self, filter_id: FilterId, what: &str, pred: P) -> Option<ConsumerInfo>
    where
        P: Fn(Option<&ConsumerInfo>) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let info = self.orchestrator.registry().get(filter_id);
            if pred(info.as_ref()) {
                return info;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {what}: {info:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits for a listening consumer serving `subscribers` subscriptions.
    pub async fn listening(&self, filter_id: FilterId, subscribers: usize) -> ConsumerInfo {
        let info = self
            .wait_consumer(filter_id, "listening consumer", |info| {
                info.is_some_and(|i| i.subscriber_count == subscribers)
            })
            .await;
        let Some(info) = info else {
            panic!("consumer vanished");
        };
        info
    }

    /// Waits until `filter_id` has no registry entry.
    pub async fn released(&self, filter_id: FilterId) {
        self.wait_consumer(filter_id, "consumer release", |info| info.is_none())
            .await;
    }

    /// Waits for at least `count` deliveries.
    pub async fn deliveries(&self, count: usize) -> Vec<Delivery> {
        let Ok(deliveries) = tokio::time::timeout(WAIT, self.transport.wait_for(count)).await else {
            panic!("timed out waiting for {count} deliveries");
        };
        deliveries
    }

    /// Checks that no delivery beyond `count` arrives for a short while.
    pub async fn settle(&self, count: usize) -> Vec<Delivery> {
        let deliveries = self.deliveries(count).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after = self.transport.deliveries().await;
        assert_eq!(after.len(), deliveries.len(), "unexpected extra deliveries: {after:?}");
        after
    }
}

pub fn filter(exchange: &str, key: &str, exchange_type: ExchangeType) -> NewBusFilter {
    NewBusFilter {
        exchange: exchange.to_string(),
        key: key.to_string(),
        exchange_type,
        durable: true,
        description: None,
        category: None,
        template_id: None,
    }
}
