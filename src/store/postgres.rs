//! PostgreSQL implementation of every store trait.
//!
//! Deduplication and cascades are enforced by the schema in `migrations/`.
//! A row trigger on `subscriptions` emits `pg_notify` with the old and new
//! row; a background [`PgListener`] task forwards those payloads into the
//! store's [`ChangeFeed`]. When the listener loses its connection the feed
//! is closed, which the orchestrator treats as fatal.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgListener, PgPoolOptions};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    FilterInsert, FilterStore, StoreError, SubscriptionStore, TemplateStore, UserStore,
};
use crate::config::RouterConfig;
use crate::domain::{
    BusFilter, ChangeFeed, ChangeStream, ExchangeType, FilterId, NewBusFilter, NewSubscription,
    NewTemplate, NewUser, Subscription, SubscriptionChange, SubscriptionDetail, SubscriptionId,
    Template, TemplateId, User, UserId,
};

/// Notification channel written by the `subscriptions` trigger.
const CHANGE_CHANNEL: &str = "subscription_changes";

const FILTER_COLUMNS: &str =
    "id, exchange, key, exchange_type, durable, description, category, template_id";

const DETAIL_SELECT: &str = "SELECT s.id, s.user_id, s.filter_id, s.template_id, u.name, u.email, \
     f.exchange, f.key, f.exchange_type, f.durable, f.description, f.category, f.template_id \
     FROM subscriptions s \
     JOIN users u ON u.id = s.user_id \
     JOIN bus_filters f ON f.id = s.filter_id";

type FilterRow = (
    Uuid,
    String,
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
    Option<Uuid>,
);

type DetailRow = (
    Uuid,
    Uuid,
    Uuid,
    Option<Uuid>,
    String,
    String,
    String,
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
    Option<Uuid>,
);

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
    feed: ChangeFeed,
    listener: JoinHandle<()>,
}

impl PostgresStore {
    /// Connects the pool, applies pending migrations and starts the change
    /// listener.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable, a
    /// migration fails, or `LISTEN` cannot be issued.
    pub async fn connect(config: &RouterConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(db_error)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut listener = PgListener::connect_with(&pool).await.map_err(db_error)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(db_error)?;

        let feed = ChangeFeed::new(config.change_feed_capacity);
        let listener = tokio::spawn(forward_notifications(listener, feed.clone()));
        tracing::info!(channel = CHANGE_CHANNEL, "postgres change listener started");

        Ok(Self {
            pool,
            feed,
            listener,
        })
    }

    /// Returns the store's change feed.
    #[must_use]
    pub const fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Pumps `pg_notify` payloads into the feed until the connection is lost.
async fn forward_notifications(mut listener: PgListener, feed: ChangeFeed) {
    loop {
        match listener.try_recv().await {
            Ok(Some(notification)) => {
                match serde_json::from_str::<SubscriptionChange>(notification.payload()) {
                    Ok(change) => {
                        feed.publish(change);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding malformed change notification");
                    }
                }
            }
            Ok(None) => {
                tracing::error!("postgres change listener lost its connection");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "postgres change listener failed");
                break;
            }
        }
    }
    feed.close();
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Maps constraint violations on writes to domain errors.
fn write_error(e: sqlx::Error, user_id: Uuid, filter_id: Uuid) -> StoreError {
    if let Some(db) = e.as_database_error() {
        match db.constraint() {
            Some("subscriptions_user_id_fkey") => return StoreError::not_found("user", user_id),
            Some("subscriptions_filter_id_fkey") => {
                return StoreError::not_found("filter", filter_id);
            }
            Some("bus_filters_binding") => {
                return StoreError::Conflict("a filter with this exchange and key exists".into());
            }
            _ => {}
        }
    }
    db_error(e)
}

fn parse_exchange_type(raw: &str) -> Result<ExchangeType, StoreError> {
    raw.parse().map_err(StoreError::Database)
}

fn filter_from_row(row: FilterRow) -> Result<BusFilter, StoreError> {
    let (id, exchange, key, exchange_type, durable, description, category, template_id) = row;
    Ok(BusFilter {
        id: id.into(),
        exchange,
        key,
        exchange_type: parse_exchange_type(&exchange_type)?,
        durable,
        description,
        category,
        template_id: template_id.map(TemplateId::from),
    })
}

fn detail_from_row(row: DetailRow) -> Result<SubscriptionDetail, StoreError> {
    let (
        id,
        user_id,
        filter_id,
        template_id,
        name,
        email,
        exchange,
        key,
        exchange_type,
        durable,
        description,
        category,
        filter_template_id,
    ) = row;
    Ok(SubscriptionDetail {
        subscription: Subscription {
            id: id.into(),
            user_id: user_id.into(),
            filter_id: filter_id.into(),
            template_id: template_id.map(TemplateId::from),
        },
        user: User {
            id: user_id.into(),
            name,
            email,
        },
        filter: BusFilter {
            id: filter_id.into(),
            exchange,
            key,
            exchange_type: parse_exchange_type(&exchange_type)?,
            durable,
            description,
            category,
            template_id: filter_template_id.map(TemplateId::from),
        },
    })
}

fn subscription_from_row(row: (Uuid, Uuid, Uuid, Option<Uuid>)) -> Subscription {
    let (id, user_id, filter_id, template_id) = row;
    Subscription {
        id: id.into(),
        user_id: user_id.into(),
        filter_id: filter_id.into(),
        template_id: template_id.map(TemplateId::from),
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, name, email FROM users ORDER BY name, email",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|(id, name, email)| User {
                id: id.into(),
                name,
                email,
            })
            .collect())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, name, email FROM users WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|(id, name, email)| User {
            id: id.into(),
            name,
            email,
        }))
    }

    async fn find_user(&self, key: &NewUser) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, name, email FROM users WHERE name = $1 AND email = $2 LIMIT 1",
        )
        .bind(&key.name)
        .bind(&key.email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|(id, name, email)| User {
            id: id.into(),
            name,
            email,
        }))
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let id = UserId::new();
        sqlx::query("INSERT INTO users (id, name, email) VALUES ($1, $2, $3)")
            .bind(Uuid::from(id))
            .bind(&user.name)
            .bind(&user.email)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(User {
            id,
            name: user.name,
            email: user.email,
        })
    }

    async fn update_user(&self, id: UserId, user: NewUser) -> Result<Option<User>, StoreError> {
        let result = sqlx::query("UPDATE users SET name = $2, email = $3 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(&user.name)
            .bind(&user.email)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok((result.rows_affected() > 0).then(|| User {
            id,
            name: user.name,
            email: user.email,
        }))
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl FilterStore for PostgresStore {
    async fn list_filters(&self) -> Result<Vec<BusFilter>, StoreError> {
        let rows = sqlx::query_as::<_, FilterRow>(&format!(
            "SELECT {FILTER_COLUMNS} FROM bus_filters ORDER BY exchange, key"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(filter_from_row).collect()
    }

    async fn get_filter(&self, id: FilterId) -> Result<Option<BusFilter>, StoreError> {
        let row = sqlx::query_as::<_, FilterRow>(&format!(
            "SELECT {FILTER_COLUMNS} FROM bus_filters WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(filter_from_row).transpose()
    }

    async fn find_filter(
        &self,
        exchange: &str,
        key: &str,
    ) -> Result<Option<BusFilter>, StoreError> {
        let row = sqlx::query_as::<_, FilterRow>(&format!(
            "SELECT {FILTER_COLUMNS} FROM bus_filters WHERE exchange = $1 AND key = $2"
        ))
        .bind(exchange)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(filter_from_row).transpose()
    }

    async fn insert_filter(&self, filter: NewBusFilter) -> Result<FilterInsert, StoreError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO bus_filters \
             (id, exchange, key, exchange_type, durable, description, category, template_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (exchange, key) DO NOTHING RETURNING id",
        )
        .bind(FilterId::new().as_uuid())
        .bind(&filter.exchange)
        .bind(&filter.key)
        .bind(filter.exchange_type.as_str())
        .bind(filter.durable)
        .bind(&filter.description)
        .bind(&filter.category)
        .bind(filter.template_id.map(Uuid::from))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some(id) = inserted {
            return Ok(FilterInsert::Created(id.into()));
        }

        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM bus_filters WHERE exchange = $1 AND key = $2",
        )
        .bind(&filter.exchange)
        .bind(&filter.key)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(FilterInsert::Existing(existing.into()))
    }

    async fn update_filter(
        &self,
        id: FilterId,
        filter: NewBusFilter,
    ) -> Result<Option<BusFilter>, StoreError> {
        let result = sqlx::query(
            "UPDATE bus_filters SET exchange = $2, key = $3, exchange_type = $4, durable = $5, \
             description = $6, category = $7, template_id = $8 WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(&filter.exchange)
        .bind(&filter.key)
        .bind(filter.exchange_type.as_str())
        .bind(filter.durable)
        .bind(&filter.description)
        .bind(&filter.category)
        .bind(filter.template_id.map(Uuid::from))
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, Uuid::nil(), Uuid::from(id)))?;

        Ok((result.rows_affected() > 0).then(|| filter.with_id(id)))
    }

    async fn delete_filter(&self, id: FilterId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM bus_filters WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn list_all(&self) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, Uuid, Option<Uuid>)>(
            "SELECT id, user_id, filter_id, template_id FROM subscriptions",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(subscription_from_row).collect())
    }

    async fn list_with_joins(&self) -> Result<Vec<SubscriptionDetail>, StoreError> {
        let rows = sqlx::query_as::<_, DetailRow>(DETAIL_SELECT)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(detail_from_row).collect()
    }

    async fn subscribers_of(
        &self,
        filter_id: FilterId,
    ) -> Result<Vec<SubscriptionDetail>, StoreError> {
        let rows = sqlx::query_as::<_, DetailRow>(&format!("{DETAIL_SELECT} WHERE s.filter_id = $1"))
            .bind(Uuid::from(filter_id))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(detail_from_row).collect()
    }

    async fn subscriptions_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<SubscriptionDetail>, StoreError> {
        let rows = sqlx::query_as::<_, DetailRow>(&format!("{DETAIL_SELECT} WHERE s.user_id = $1"))
            .bind(Uuid::from(user_id))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(detail_from_row).collect()
    }

    async fn get_subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, Uuid, Option<Uuid>)>(
            "SELECT id, user_id, filter_id, template_id FROM subscriptions WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(subscription_from_row))
    }

    async fn insert_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, StoreError> {
        let id = SubscriptionId::new();
        sqlx::query(
            "INSERT INTO subscriptions (id, user_id, filter_id, template_id) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(subscription.user_id))
        .bind(Uuid::from(subscription.filter_id))
        .bind(subscription.template_id.map(Uuid::from))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            write_error(
                e,
                Uuid::from(subscription.user_id),
                Uuid::from(subscription.filter_id),
            )
        })?;

        Ok(subscription.with_id(id))
    }

    async fn update_subscription(
        &self,
        id: SubscriptionId,
        subscription: NewSubscription,
    ) -> Result<Option<Subscription>, StoreError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET user_id = $2, filter_id = $3, template_id = $4 \
             WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(subscription.user_id))
        .bind(Uuid::from(subscription.filter_id))
        .bind(subscription.template_id.map(Uuid::from))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            write_error(
                e,
                Uuid::from(subscription.user_id),
                Uuid::from(subscription.filter_id),
            )
        })?;

        Ok((result.rows_affected() > 0).then(|| subscription.with_id(id)))
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    fn changes(&self) -> ChangeStream {
        self.feed.subscribe()
    }
}

#[async_trait]
impl TemplateStore for PostgresStore {
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, name, text FROM templates ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|(id, name, text)| Template {
                id: id.into(),
                name,
                text,
            })
            .collect())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, name, text FROM templates WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|(id, name, text)| Template {
            id: id.into(),
            name,
            text,
        }))
    }

    async fn insert_template(&self, template: NewTemplate) -> Result<Template, StoreError> {
        let id = TemplateId::new();
        sqlx::query("INSERT INTO templates (id, name, text) VALUES ($1, $2, $3)")
            .bind(Uuid::from(id))
            .bind(&template.name)
            .bind(&template.text)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(Template {
            id,
            name: template.name,
            text: template.text,
        })
    }

    async fn update_template(
        &self,
        id: TemplateId,
        template: NewTemplate,
    ) -> Result<Option<Template>, StoreError> {
        let result = sqlx::query("UPDATE templates SET name = $2, text = $3 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(&template.name)
            .bind(&template.text)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok((result.rows_affected() > 0).then(|| Template {
            id,
            name: template.name,
            text: template.text,
        }))
    }

    async fn delete_template(&self, id: TemplateId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn filter_row_maps_exchange_type() {
        let id = Uuid::new_v4();
        let row: FilterRow = (
            id,
            "notifications".to_string(),
            "important".to_string(),
            "topic".to_string(),
            true,
            None,
            Some("ops".to_string()),
            None,
        );
        let Ok(filter) = filter_from_row(row) else {
            panic!("valid row");
        };
        assert_eq!(Uuid::from(filter.id), id);
        assert_eq!(filter.exchange_type, ExchangeType::Topic);
        assert_eq!(filter.category.as_deref(), Some("ops"));
    }

    #[test]
    fn unknown_exchange_type_is_a_database_error() {
        let row: FilterRow = (
            Uuid::new_v4(),
            "x".to_string(),
            String::new(),
            "headers".to_string(),
            false,
            None,
            None,
            None,
        );
        assert!(matches!(filter_from_row(row), Err(StoreError::Database(_))));
    }

    #[test]
    fn trigger_payload_decodes_as_change() {
        let payload = format!(
            r#"{{"old":null,"new":{{"id":"{}","user_id":"{}","filter_id":"{}","template_id":null}}}}"#,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let Ok(change) = serde_json::from_str::<SubscriptionChange>(&payload) else {
            panic!("trigger payload should decode");
        };
        assert!(change.old.is_none());
        assert!(change.new.is_some());
    }
}
