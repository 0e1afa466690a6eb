//! Admin service: validates and applies configuration changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::bus::LocalBus;
use crate::domain::{
    BusFilter, BusMessage, ExchangeType, FilterId, NewBusFilter, NewSubscription, NewTemplate,
    NewUser, Subscription, SubscriptionDetail, SubscriptionId, Template, TemplateId, User, UserId,
};
use crate::engine::{ConsumerInfo, Orchestrator};
use crate::error::ApiError;
use crate::store::{FilterInsert, Stores};

/// Coordination layer behind every administrative endpoint.
///
/// Stateless: owns the store handles, the orchestrator (to request
/// reconciles after filter and user edits) and the local bus (for message
/// injection). Subscription writes need no explicit notification; the
/// orchestrator observes them on the change feed.
#[derive(Debug, Clone)]
pub struct AdminService {
    stores: Stores,
    orchestrator: Arc<Orchestrator>,
    bus: LocalBus,
}

impl AdminService {
    /// Creates a new `AdminService`.
    #[must_use]
    pub const fn new(stores: Stores, orchestrator: Arc<Orchestrator>, bus: LocalBus) -> Self {
        Self {
            stores,
            orchestrator,
            bus,
        }
    }

    /// Returns the store handles.
    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    // ── Users ───────────────────────────────────────────────────────────

    /// Lists every user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::PersistenceError`] on store failure.
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        Ok(self.stores.users.list_users().await?)
    }

    /// Fetches one user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the user does not exist.
    pub async fn get_user(&self, id: UserId) -> Result<User, ApiError> {
        self.stores
            .users
            .get_user(id)
            .await?
            .ok_or_else(|| ApiError::not_found("user", id))
    }

    /// Creates a user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if the name or email is blank.
    pub async fn create_user(&self, user: NewUser) -> Result<User, ApiError> {
        validate_user(&user)?;
        let user = self.stores.users.insert_user(user).await?;
        tracing::info!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Replaces a user's fields and refreshes every consumer that
    /// delivers to the user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] on blank fields and
    /// [`ApiError::NotFound`] if the user does not exist.
    pub async fn update_user(&self, id: UserId, user: NewUser) -> Result<User, ApiError> {
        validate_user(&user)?;
        let user = self
            .stores
            .users
            .update_user(id, user)
            .await?
            .ok_or_else(|| ApiError::not_found("user", id))?;

        let filter_ids: BTreeSet<FilterId> = self
            .stores
            .subscriptions
            .subscriptions_of_user(id)
            .await?
            .into_iter()
            .map(|detail| detail.filter.id)
            .collect();
        for filter_id in filter_ids {
            self.orchestrator.request_reconcile(filter_id).await;
        }
        tracing::info!(user_id = %id, "user updated");
        Ok(user)
    }

    /// Deletes a user and its subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the user does not exist.
    pub async fn delete_user(&self, id: UserId) -> Result<(), ApiError> {
        if !self.stores.users.delete_user(id).await? {
            return Err(ApiError::not_found("user", id));
        }
        tracing::info!(user_id = %id, "user deleted");
        Ok(())
    }

    /// Lists the filters a user is subscribed to.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the user does not exist.
    pub async fn user_filters(&self, id: UserId) -> Result<Vec<BusFilter>, ApiError> {
        self.get_user(id).await?;
        let mut filters: Vec<BusFilter> = self
            .stores
            .subscriptions
            .subscriptions_of_user(id)
            .await?
            .into_iter()
            .map(|detail| detail.filter)
            .collect();
        filters.sort_by_key(|f| f.id);
        filters.dedup_by_key(|f| f.id);
        Ok(filters)
    }

    // ── Filters ─────────────────────────────────────────────────────────

    /// Lists every filter.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::PersistenceError`] on store failure.
    pub async fn list_filters(&self) -> Result<Vec<BusFilter>, ApiError> {
        Ok(self.stores.filters.list_filters().await?)
    }

    /// Fetches one filter.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the filter does not exist.
    pub async fn get_filter(&self, id: FilterId) -> Result<BusFilter, ApiError> {
        self.stores
            .filters
            .get_filter(id)
            .await?
            .ok_or_else(|| ApiError::not_found("filter", id))
    }

    /// Inserts filters, deduplicating on `(exchange, key)`.
    ///
    /// Every filter is validated before any is written.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if any filter is invalid.
    pub async fn create_filters(
        &self,
        filters: Vec<NewBusFilter>,
    ) -> Result<Vec<FilterInsert>, ApiError> {
        if filters.is_empty() {
            return Err(ApiError::Validation("at least one filter is required".into()));
        }
        for filter in &filters {
            validate_filter(filter)?;
        }

        let mut results = Vec::with_capacity(filters.len());
        for filter in filters {
            let exchange = filter.exchange.clone();
            let key = filter.key.clone();
            let inserted = self.stores.filters.insert_filter(filter).await?;
            match inserted {
                FilterInsert::Created(id) => {
                    tracing::info!(filter_id = %id, %exchange, %key, "filter created");
                }
                FilterInsert::Existing(id) => {
                    tracing::debug!(filter_id = %id, %exchange, %key, "filter already exists");
                }
            }
            results.push(inserted);
        }
        Ok(results)
    }

    /// Replaces a filter's fields and reconciles its consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] on invalid input,
    /// [`ApiError::NotFound`] if the filter does not exist and
    /// [`ApiError::Conflict`] if the new binding belongs to another filter.
    pub async fn update_filter(
        &self,
        id: FilterId,
        filter: NewBusFilter,
    ) -> Result<BusFilter, ApiError> {
        validate_filter(&filter)?;
        let updated = self
            .stores
            .filters
            .update_filter(id, filter)
            .await?
            .ok_or_else(|| ApiError::not_found("filter", id))?;
        self.orchestrator.request_reconcile(id).await;
        tracing::info!(filter_id = %id, binding = %updated.binding(), "filter updated");
        Ok(updated)
    }

    /// Deletes a filter and its subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the filter does not exist.
    pub async fn delete_filter(&self, id: FilterId) -> Result<(), ApiError> {
        if !self.stores.filters.delete_filter(id).await? {
            return Err(ApiError::not_found("filter", id));
        }
        tracing::info!(filter_id = %id, "filter deleted");
        Ok(())
    }

    /// Returns the default template of a filter.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the filter does not exist, has no
    /// template, or references a deleted one.
    pub async fn filter_template(&self, id: FilterId) -> Result<Template, ApiError> {
        let filter = self.get_filter(id).await?;
        let Some(template_id) = filter.template_id else {
            return Err(ApiError::not_found("filter template", id));
        };
        self.get_template(template_id).await
    }

    /// Creates a template and makes it the filter's default.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the filter does not exist and
    /// [`ApiError::Validation`] if the template is invalid.
    pub async fn attach_template(
        &self,
        id: FilterId,
        template: NewTemplate,
    ) -> Result<Template, ApiError> {
        let filter = self.get_filter(id).await?;
        let template = self.create_template(template).await?;

        let updated = NewBusFilter {
            exchange: filter.exchange,
            key: filter.key,
            exchange_type: filter.exchange_type,
            durable: filter.durable,
            description: filter.description,
            category: filter.category,
            template_id: Some(template.id),
        };
        self.stores
            .filters
            .update_filter(id, updated)
            .await?
            .ok_or_else(|| ApiError::not_found("filter", id))?;
        self.orchestrator.request_reconcile(id).await;
        tracing::info!(filter_id = %id, template_id = %template.id, "template attached");
        Ok(template)
    }

    /// Lists the joined subscriptions of a filter.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the filter does not exist.
    pub async fn filter_subscribers(
        &self,
        id: FilterId,
    ) -> Result<Vec<SubscriptionDetail>, ApiError> {
        self.get_filter(id).await?;
        Ok(self.stores.subscriptions.subscribers_of(id).await?)
    }

    /// Subscribes a user to a filter, creating the user if no user with the
    /// same name and email exists.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the filter does not exist and
    /// [`ApiError::Validation`] on blank user fields.
    pub async fn subscribe(
        &self,
        filter_id: FilterId,
        user: NewUser,
        template_id: Option<TemplateId>,
    ) -> Result<SubscriptionDetail, ApiError> {
        validate_user(&user)?;
        let filter = self.get_filter(filter_id).await?;

        let user = match self.stores.users.find_user(&user).await? {
            Some(existing) => existing,
            None => self.create_user(user).await?,
        };
        let subscription = self
            .stores
            .subscriptions
            .insert_subscription(NewSubscription {
                user_id: user.id,
                filter_id,
                template_id,
            })
            .await?;
        tracing::info!(
            subscription_id = %subscription.id,
            %filter_id,
            user_id = %user.id,
            "user subscribed"
        );

        Ok(SubscriptionDetail {
            subscription,
            user,
            filter,
        })
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    /// Lists every subscription joined with its user and filter.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::PersistenceError`] on store failure.
    pub async fn list_subscriptions(&self) -> Result<Vec<SubscriptionDetail>, ApiError> {
        Ok(self.stores.subscriptions.list_with_joins().await?)
    }

    /// Fetches one subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the subscription does not exist.
    pub async fn get_subscription(&self, id: SubscriptionId) -> Result<Subscription, ApiError> {
        self.stores
            .subscriptions
            .get_subscription(id)
            .await?
            .ok_or_else(|| ApiError::not_found("subscription", id))
    }

    /// Creates a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the user or filter does not exist.
    pub async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, ApiError> {
        let subscription = self
            .stores
            .subscriptions
            .insert_subscription(subscription)
            .await?;
        tracing::info!(
            subscription_id = %subscription.id,
            filter_id = %subscription.filter_id,
            "subscription created"
        );
        Ok(subscription)
    }

    /// Replaces a subscription's fields.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the subscription, user or filter
    /// does not exist.
    pub async fn update_subscription(
        &self,
        id: SubscriptionId,
        subscription: NewSubscription,
    ) -> Result<Subscription, ApiError> {
        self.stores
            .subscriptions
            .update_subscription(id, subscription)
            .await?
            .ok_or_else(|| ApiError::not_found("subscription", id))
    }

    /// Deletes a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the subscription does not exist.
    pub async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), ApiError> {
        if !self.stores.subscriptions.delete_subscription(id).await? {
            return Err(ApiError::not_found("subscription", id));
        }
        tracing::info!(subscription_id = %id, "subscription deleted");
        Ok(())
    }

    // ── Templates ───────────────────────────────────────────────────────

    /// Lists every template.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::PersistenceError`] on store failure.
    pub async fn list_templates(&self) -> Result<Vec<Template>, ApiError> {
        Ok(self.stores.templates.list_templates().await?)
    }

    /// Fetches one template.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the template does not exist.
    pub async fn get_template(&self, id: TemplateId) -> Result<Template, ApiError> {
        self.stores
            .templates
            .get_template(id)
            .await?
            .ok_or_else(|| ApiError::not_found("template", id))
    }

    /// Creates a template.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if the name is blank.
    pub async fn create_template(&self, template: NewTemplate) -> Result<Template, ApiError> {
        validate_template(&template)?;
        let template = self.stores.templates.insert_template(template).await?;
        tracing::info!(template_id = %template.id, "template created");
        Ok(template)
    }

    /// Replaces a template.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] on a blank name and
    /// [`ApiError::NotFound`] if the template does not exist.
    pub async fn update_template(
        &self,
        id: TemplateId,
        template: NewTemplate,
    ) -> Result<Template, ApiError> {
        validate_template(&template)?;
        self.stores
            .templates
            .update_template(id, template)
            .await?
            .ok_or_else(|| ApiError::not_found("template", id))
    }

    /// Deletes a template. Filters and subscriptions referencing it keep
    /// the dangling id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the template does not exist.
    pub async fn delete_template(&self, id: TemplateId) -> Result<(), ApiError> {
        if !self.stores.templates.delete_template(id).await? {
            return Err(ApiError::not_found("template", id));
        }
        tracing::info!(template_id = %id, "template deleted");
        Ok(())
    }

    // ── Runtime ─────────────────────────────────────────────────────────

    /// Summaries of every live consumer.
    #[must_use]
    pub fn consumers(&self) -> Vec<ConsumerInfo> {
        self.orchestrator.consumers()
    }

    /// Publishes a message on the local bus.
    ///
    /// Returns the number of queues that accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] on a blank exchange and
    /// [`ApiError::NotFound`]-class bus errors for undeclared exchanges.
    pub fn publish(&self, message: &BusMessage) -> Result<usize, ApiError> {
        if message.exchange.trim().is_empty() {
            return Err(ApiError::Validation("exchange must not be empty".into()));
        }
        Ok(self.bus.publish(message)?)
    }

    /// Inserts the demo user and filter unless they already exist.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::PersistenceError`] on store failure.
    pub async fn seed_demo_data(&self) -> Result<(User, FilterId), ApiError> {
        let demo = NewUser {
            name: "Demo".to_string(),
            email: "demo@example.com".to_string(),
        };
        let user = match self.stores.users.find_user(&demo).await? {
            Some(existing) => existing,
            None => self.stores.users.insert_user(demo).await?,
        };
        let filter = self
            .stores
            .filters
            .insert_filter(NewBusFilter {
                exchange: "notifications".to_string(),
                key: "important".to_string(),
                exchange_type: ExchangeType::Direct,
                durable: true,
                description: Some("Demo filter".to_string()),
                category: Some("demo".to_string()),
                template_id: None,
            })
            .await?;
        tracing::info!(user_id = %user.id, filter_id = %filter.id(), "demo data seeded");
        Ok((user, filter.id()))
    }
}

fn validate_user(user: &NewUser) -> Result<(), ApiError> {
    if user.name.trim().is_empty() {
        return Err(ApiError::Validation("user name must not be empty".into()));
    }
    if user.email.trim().is_empty() {
        return Err(ApiError::Validation("user email must not be empty".into()));
    }
    Ok(())
}

fn validate_filter(filter: &NewBusFilter) -> Result<(), ApiError> {
    if filter.exchange.trim().is_empty() {
        return Err(ApiError::Validation("filter exchange must not be empty".into()));
    }
    if filter.exchange_type != ExchangeType::Fanout && filter.key.trim().is_empty() {
        return Err(ApiError::Validation(format!(
            "{} filters need a routing key",
            filter.exchange_type
        )));
    }
    Ok(())
}

fn validate_template(template: &NewTemplate) -> Result<(), ApiError> {
    if template.name.trim().is_empty() {
        return Err(ApiError::Validation("template name must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::Dispatcher;
    use crate::store::MemoryStore;
    use crate::transport::LogTransport;

    fn service() -> AdminService {
        let store = Arc::new(MemoryStore::default());
        let stores = Stores::from_backend(&store);
        let bus = LocalBus::new(8);
        let dispatcher = Dispatcher::new(
            Arc::clone(&stores.templates),
            Arc::new(LogTransport),
            Duration::from_secs(1),
        );
        let orchestrator = Orchestrator::new(&stores, Arc::new(bus.clone()), dispatcher, 8);
        AdminService::new(stores, orchestrator, bus)
    }

    fn filter(key: &str) -> NewBusFilter {
        NewBusFilter {
            exchange: "notifications".to_string(),
            key: key.to_string(),
            exchange_type: ExchangeType::Direct,
            durable: true,
            description: None,
            category: None,
            template_id: None,
        }
    }

    fn demo_user() -> NewUser {
        NewUser {
            name: "Demo".to_string(),
            email: "demo@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_filter_returns_first_id() {
        let svc = service();
        let Ok(first) = svc.create_filters(vec![filter("important")]).await else {
            panic!("create");
        };
        let Ok(second) = svc.create_filters(vec![filter("important")]).await else {
            panic!("create");
        };
        let (Some(first), Some(second)) = (first.first(), second.first()) else {
            panic!("one result each");
        };
        assert!(matches!(second, FilterInsert::Existing(_)));
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn invalid_filter_rejects_whole_batch() {
        let svc = service();
        let mut bad = filter("");
        bad.exchange_type = ExchangeType::Topic;
        let result = svc.create_filters(vec![filter("a"), bad]).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert_eq!(svc.list_filters().await.ok().map(|f| f.len()), Some(0));
    }

    #[tokio::test]
    async fn subscribe_reuses_existing_user() {
        let svc = service();
        let Ok(inserted) = svc.create_filters(vec![filter("important")]).await else {
            panic!("create");
        };
        let Some(filter_id) = inserted.first().map(|i| i.id()) else {
            panic!("one filter");
        };

        let Ok(first) = svc.subscribe(filter_id, demo_user(), None).await else {
            panic!("subscribe");
        };
        let Ok(second) = svc.subscribe(filter_id, demo_user(), None).await else {
            panic!("subscribe");
        };
        assert_eq!(first.user.id, second.user.id);
        assert_eq!(svc.list_users().await.ok().map(|u| u.len()), Some(1));
        assert_eq!(svc.filter_subscribers(filter_id).await.ok().map(|s| s.len()), Some(2));
    }

    #[tokio::test]
    async fn subscribe_to_missing_filter_is_not_found() {
        let svc = service();
        let result = svc.subscribe(FilterId::new(), demo_user(), None).await;
        assert!(matches!(result, Err(ApiError::NotFound { entity: "filter", .. })));
    }

    #[tokio::test]
    async fn attach_template_sets_filter_default() {
        let svc = service();
        let Ok(inserted) = svc.create_filters(vec![filter("important")]).await else {
            panic!("create");
        };
        let Some(filter_id) = inserted.first().map(|i| i.id()) else {
            panic!("one filter");
        };
        assert!(matches!(
            svc.filter_template(filter_id).await,
            Err(ApiError::NotFound { .. })
        ));

        let Ok(template) = svc
            .attach_template(
                filter_id,
                NewTemplate {
                    name: "alert".to_string(),
                    text: "Alert: {{ body }}".to_string(),
                },
            )
            .await
        else {
            panic!("attach");
        };
        let Ok(fetched) = svc.filter_template(filter_id).await else {
            panic!("template should resolve");
        };
        assert_eq!(fetched, template);
    }

    #[tokio::test]
    async fn user_filters_lists_each_filter_once() {
        let svc = service();
        let Ok(inserted) = svc.create_filters(vec![filter("a"), filter("b")]).await else {
            panic!("create");
        };
        let ids: Vec<FilterId> = inserted.iter().map(|i| i.id()).collect();
        let Some(&first) = ids.first() else {
            panic!("two filters");
        };
        let mut user_id = None;
        for id in ids.iter().copied().chain([first]) {
            let Ok(detail) = svc.subscribe(id, demo_user(), None).await else {
                panic!("subscribe");
            };
            user_id = Some(detail.user.id);
        }
        let Some(user_id) = user_id else {
            panic!("user");
        };

        assert_eq!(svc.user_filters(user_id).await.ok().map(|f| f.len()), Some(2));
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let svc = service();
        let (Ok((u1, f1)), Ok((u2, f2))) = (svc.seed_demo_data().await, svc.seed_demo_data().await)
        else {
            panic!("seed");
        };
        assert_eq!(u1.id, u2.id);
        assert_eq!(f1, f2);
    }

    #[test]
    fn publish_to_blank_exchange_is_invalid() {
        let svc = service();
        let result = svc.publish(&BusMessage::new(" ", "k", "x"));
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }
}
