//! Process-local store implementing every table.
//!
//! All tables live behind one [`tokio::sync::RwLock`] so that a cascade
//! (filter or user deletion) is atomic with respect to readers, and change
//! events are published while the write lock is held so the feed order
//! always matches the commit order.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    FilterInsert, FilterStore, StoreError, SubscriptionStore, TemplateStore, UserStore,
};
use crate::domain::{
    BusFilter, ChangeFeed, ChangeStream, FilterId, NewBusFilter, NewSubscription, NewTemplate,
    NewUser, Subscription, SubscriptionChange, SubscriptionDetail, SubscriptionId, Template,
    TemplateId, User, UserId,
};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    filters: HashMap<FilterId, BusFilter>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    templates: HashMap<TemplateId, Template>,
}

impl Tables {
    fn join(&self, subscription: &Subscription) -> Option<SubscriptionDetail> {
        let user = self.users.get(&subscription.user_id)?;
        let filter = self.filters.get(&subscription.filter_id)?;
        Some(SubscriptionDetail {
            subscription: subscription.clone(),
            user: user.clone(),
            filter: filter.clone(),
        })
    }

    fn binding_owner(&self, exchange: &str, key: &str) -> Option<&BusFilter> {
        self.filters
            .values()
            .find(|filter| filter.exchange == exchange && filter.key == key)
    }

    fn check_references(&self, subscription: &NewSubscription) -> Result<(), StoreError> {
        if !self.users.contains_key(&subscription.user_id) {
            return Err(StoreError::not_found("user", subscription.user_id));
        }
        if !self.filters.contains_key(&subscription.filter_id) {
            return Err(StoreError::not_found("filter", subscription.filter_id));
        }
        Ok(())
    }

    /// Removes every subscription matching `predicate`, returning them.
    fn remove_subscriptions(
        &mut self,
        predicate: impl Fn(&Subscription) -> bool,
    ) -> Vec<Subscription> {
        let doomed: Vec<SubscriptionId> = self
            .subscriptions
            .values()
            .filter(|s| predicate(*s))
            .map(|s| s.id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.subscriptions.remove(&id))
            .collect()
    }
}

/// In-memory implementation of every store trait.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    feed: ChangeFeed,
}

impl MemoryStore {
    /// Creates an empty store whose change feed buffers `feed_capacity`
    /// events per reader.
    #[must_use]
    pub fn new(feed_capacity: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            feed: ChangeFeed::new(feed_capacity),
        }
    }

    /// Returns the producer side of the change feed.
    #[must_use]
    pub const fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn publish_deleted(&self, removed: Vec<Subscription>) {
        for subscription in removed {
            tracing::debug!(subscription_id = %subscription.id, "subscription removed by cascade");
            self.feed.publish(SubscriptionChange::deleted(subscription));
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user(&self, key: &NewUser) -> Result<Option<User>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|user| user.name == key.name && user.email == key.email)
            .cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let user = User {
            id: UserId::new(),
            name: user.name,
            email: user.email,
        };
        self.tables
            .write()
            .await
            .users
            .insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: UserId, user: NewUser) -> Result<Option<User>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(existing) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        existing.name = user.name;
        existing.email = user.email;
        Ok(Some(existing.clone()))
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        let removed = tables.remove_subscriptions(|s| s.user_id == id);
        self.publish_deleted(removed);
        Ok(true)
    }
}

#[async_trait]
impl FilterStore for MemoryStore {
    async fn list_filters(&self) -> Result<Vec<BusFilter>, StoreError> {
        Ok(self.tables.read().await.filters.values().cloned().collect())
    }

    async fn get_filter(&self, id: FilterId) -> Result<Option<BusFilter>, StoreError> {
        Ok(self.tables.read().await.filters.get(&id).cloned())
    }

    async fn find_filter(
        &self,
        exchange: &str,
        key: &str,
    ) -> Result<Option<BusFilter>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .binding_owner(exchange, key)
            .cloned())
    }

    async fn insert_filter(&self, filter: NewBusFilter) -> Result<FilterInsert, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.binding_owner(&filter.exchange, &filter.key) {
            return Ok(FilterInsert::Existing(existing.id));
        }
        let id = FilterId::new();
        tables.filters.insert(id, filter.with_id(id));
        Ok(FilterInsert::Created(id))
    }

    async fn update_filter(
        &self,
        id: FilterId,
        filter: NewBusFilter,
    ) -> Result<Option<BusFilter>, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.filters.contains_key(&id) {
            return Ok(None);
        }
        if let Some(owner) = tables.binding_owner(&filter.exchange, &filter.key)
            && owner.id != id
        {
            return Err(StoreError::Conflict(format!(
                "exchange {} key {} already bound by filter {}",
                filter.exchange, filter.key, owner.id
            )));
        }
        let updated = filter.with_id(id);
        tables.filters.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_filter(&self, id: FilterId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.filters.remove(&id).is_none() {
            return Ok(false);
        }
        let removed = tables.remove_subscriptions(|s| s.filter_id == id);
        self.publish_deleted(removed);
        Ok(true)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .subscriptions
            .values()
            .cloned()
            .collect())
    }

    async fn list_with_joins(&self) -> Result<Vec<SubscriptionDetail>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter_map(|s| tables.join(s))
            .collect())
    }

    async fn subscribers_of(
        &self,
        filter_id: FilterId,
    ) -> Result<Vec<SubscriptionDetail>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter(|s| s.filter_id == filter_id)
            .filter_map(|s| tables.join(s))
            .collect())
    }

    async fn get_subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self.tables.read().await.subscriptions.get(&id).cloned())
    }

    async fn insert_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, StoreError> {
        let mut tables = self.tables.write().await;
        tables.check_references(&subscription)?;
        let subscription = subscription.with_id(SubscriptionId::new());
        tables
            .subscriptions
            .insert(subscription.id, subscription.clone());
        self.feed
            .publish(SubscriptionChange::created(subscription.clone()));
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        id: SubscriptionId,
        subscription: NewSubscription,
    ) -> Result<Option<Subscription>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.check_references(&subscription)?;
        let updated = subscription.with_id(id);
        let Some(old) = tables.subscriptions.get_mut(&id) else {
            return Ok(None);
        };
        let old = std::mem::replace(old, updated.clone());
        self.feed
            .publish(SubscriptionChange::updated(old, updated.clone()));
        Ok(Some(updated))
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(removed) = tables.subscriptions.remove(&id) else {
            return Ok(false);
        };
        self.feed.publish(SubscriptionChange::deleted(removed));
        Ok(true)
    }

    fn changes(&self) -> ChangeStream {
        self.feed.subscribe()
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .templates
            .values()
            .cloned()
            .collect())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>, StoreError> {
        Ok(self.tables.read().await.templates.get(&id).cloned())
    }

    async fn insert_template(&self, template: NewTemplate) -> Result<Template, StoreError> {
        let template = Template {
            id: TemplateId::new(),
            name: template.name,
            text: template.text,
        };
        self.tables
            .write()
            .await
            .templates
            .insert(template.id, template.clone());
        Ok(template)
    }

    async fn update_template(
        &self,
        id: TemplateId,
        template: NewTemplate,
    ) -> Result<Option<Template>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(existing) = tables.templates.get_mut(&id) else {
            return Ok(None);
        };
        existing.name = template.name;
        existing.text = template.text;
        Ok(Some(existing.clone()))
    }

    async fn delete_template(&self, id: TemplateId) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.templates.remove(&id).is_some())
    }
}
