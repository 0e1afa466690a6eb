//! Persistence layer: store traits and their implementations.
//!
//! The routing engine only depends on the read side of these traits plus
//! [`SubscriptionStore::changes`]; the administrative service uses the
//! write side. Two backends implement every trait:
//!
//! - [`MemoryStore`]: process-local tables, used by default and in tests.
//! - [`PostgresStore`]: `sqlx::PgPool` tables with a `LISTEN/NOTIFY`
//!   driven change feed.

pub mod memory;
pub mod postgres;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    BusFilter, ChangeStream, FilterId, NewBusFilter, NewSubscription, NewTemplate, NewUser,
    Subscription, SubscriptionDetail, SubscriptionId, Template, TemplateId, User, UserId,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Errors raised by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`"user"`, `"filter"`, ...).
        entity: &'static str,
        /// Missing identifier.
        id: uuid::Uuid,
    },

    /// The write would violate a uniqueness rule.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<uuid::Uuid>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Result of a filter insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterInsert {
    /// A new filter row was written.
    Created(FilterId),
    /// A filter with the same `(exchange, key)` already existed.
    Existing(FilterId),
}

impl FilterInsert {
    /// Returns the id of the new or pre-existing filter.
    #[must_use]
    pub const fn id(self) -> FilterId {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }
}

/// Users table.
#[async_trait]
pub trait UserStore: Send + Sync + Debug {
    /// Lists every user.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Fetches a user by id.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Looks a user up by its natural key (`name` and `email`).
    async fn find_user(&self, key: &NewUser) -> Result<Option<User>, StoreError>;

    /// Inserts a user.
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Replaces a user's fields. Returns `None` if it does not exist.
    async fn update_user(&self, id: UserId, user: NewUser) -> Result<Option<User>, StoreError>;

    /// Deletes a user and every subscription it holds. Returns `false` if
    /// it did not exist.
    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError>;
}

/// Filters table.
#[async_trait]
pub trait FilterStore: Send + Sync + Debug {
    /// Lists every filter.
    async fn list_filters(&self) -> Result<Vec<BusFilter>, StoreError>;

    /// Fetches a filter by id.
    async fn get_filter(&self, id: FilterId) -> Result<Option<BusFilter>, StoreError>;

    /// Fetches the filter bound to `(exchange, key)`.
    async fn find_filter(&self, exchange: &str, key: &str)
    -> Result<Option<BusFilter>, StoreError>;

    /// Inserts a filter unless one with the same `(exchange, key)` exists.
    async fn insert_filter(&self, filter: NewBusFilter) -> Result<FilterInsert, StoreError>;

    /// Replaces a filter's fields. Returns `None` if it does not exist.
    ///
    /// Fails with [`StoreError::Conflict`] if the new `(exchange, key)` is
    /// taken by another filter.
    async fn update_filter(
        &self,
        id: FilterId,
        filter: NewBusFilter,
    ) -> Result<Option<BusFilter>, StoreError>;

    /// Deletes a filter and every subscription referencing it. Returns
    /// `false` if it did not exist.
    async fn delete_filter(&self, id: FilterId) -> Result<bool, StoreError>;
}

/// Subscriptions table with its change feed.
#[async_trait]
pub trait SubscriptionStore: Send + Sync + Debug {
    /// Lists every subscription.
    async fn list_all(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Lists every subscription joined with its user and filter.
    async fn list_with_joins(&self) -> Result<Vec<SubscriptionDetail>, StoreError>;

    /// Lists the joined subscriptions of one filter.
    async fn subscribers_of(
        &self,
        filter_id: FilterId,
    ) -> Result<Vec<SubscriptionDetail>, StoreError> {
        Ok(self
            .list_with_joins()
            .await?
            .into_iter()
            .filter(|detail| detail.subscription.filter_id == filter_id)
            .collect())
    }

    /// Lists the joined subscriptions of one user.
    async fn subscriptions_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<SubscriptionDetail>, StoreError> {
        Ok(self
            .list_with_joins()
            .await?
            .into_iter()
            .filter(|detail| detail.subscription.user_id == user_id)
            .collect())
    }

    /// Fetches a subscription by id.
    async fn get_subscription(&self, id: SubscriptionId)
    -> Result<Option<Subscription>, StoreError>;

    /// Inserts a subscription.
    ///
    /// Fails with [`StoreError::NotFound`] if the user or the filter does
    /// not exist.
    async fn insert_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, StoreError>;

    /// Replaces a subscription's fields. Returns `None` if it does not exist.
    async fn update_subscription(
        &self,
        id: SubscriptionId,
        subscription: NewSubscription,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Deletes a subscription. Returns `false` if it did not exist.
    async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool, StoreError>;

    /// Opens a stream over every subscription change committed from now on.
    fn changes(&self) -> ChangeStream;
}

/// Templates table.
#[async_trait]
pub trait TemplateStore: Send + Sync + Debug {
    /// Lists every template.
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError>;

    /// Fetches a template by id.
    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>, StoreError>;

    /// Inserts a template.
    async fn insert_template(&self, template: NewTemplate) -> Result<Template, StoreError>;

    /// Replaces a template. Returns `None` if it does not exist.
    async fn update_template(
        &self,
        id: TemplateId,
        template: NewTemplate,
    ) -> Result<Option<Template>, StoreError>;

    /// Deletes a template. Dependents keep their dangling reference.
    async fn delete_template(&self, id: TemplateId) -> Result<bool, StoreError>;
}

/// Handles to every table, as trait objects.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Users table.
    pub users: Arc<dyn UserStore>,
    /// Filters table.
    pub filters: Arc<dyn FilterStore>,
    /// Subscriptions table.
    pub subscriptions: Arc<dyn SubscriptionStore>,
    /// Templates table.
    pub templates: Arc<dyn TemplateStore>,
}

impl Stores {
    /// Splits one backend implementing every table into per-table handles.
    #[must_use]
    pub fn from_backend<B>(backend: &Arc<B>) -> Self
    where
        B: UserStore + FilterStore + SubscriptionStore + TemplateStore + 'static,
    {
        let users: Arc<dyn UserStore> = Arc::<B>::clone(backend);
        let filters: Arc<dyn FilterStore> = Arc::<B>::clone(backend);
        let subscriptions: Arc<dyn SubscriptionStore> = Arc::<B>::clone(backend);
        let templates: Arc<dyn TemplateStore> = Arc::<B>::clone(backend);
        Self {
            users,
            filters,
            subscriptions,
            templates,
        }
    }
}
