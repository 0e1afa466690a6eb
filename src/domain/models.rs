//! Persisted entities and the transient bus message.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{FilterId, SubscriptionId, TemplateId, UserId};

/// A notification recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Delivery address handed to the notification transport.
    pub email: String,
}

/// Natural key of a [`User`], used for lookup-or-create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    /// Display name.
    pub name: String,
    /// Delivery address.
    pub email: String,
}

/// Kind of exchange a filter binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeType {
    /// Routes on exact routing-key equality.
    Direct,
    /// Routes on dotted routing-key patterns (`*`, `#`).
    Topic,
    /// Routes every message to every binding.
    Fanout,
}

impl ExchangeType {
    /// Returns the lowercase wire name of the exchange type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExchangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "topic" => Ok(Self::Topic),
            "fanout" => Ok(Self::Fanout),
            other => Err(format!("unknown exchange type: {other}")),
        }
    }
}

/// A configured slice of bus traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BusFilter {
    /// Unique filter identifier.
    pub id: FilterId,
    /// Exchange name.
    pub exchange: String,
    /// Routing key (or topic pattern). Empty for fanout exchanges.
    pub key: String,
    /// Exchange kind.
    pub exchange_type: ExchangeType,
    /// Whether the exchange is declared durable.
    pub durable: bool,
    /// Free-form description.
    pub description: Option<String>,
    /// Free-form grouping label.
    pub category: Option<String>,
    /// Default template for subscriptions without their own.
    pub template_id: Option<TemplateId>,
}

impl BusFilter {
    /// Returns the bus binding this filter describes.
    #[must_use]
    pub fn binding(&self) -> Binding {
        Binding {
            exchange: self.exchange.clone(),
            key: self.key.clone(),
            exchange_type: self.exchange_type,
            durable: self.durable,
        }
    }
}

/// Filter fields supplied on creation or full update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewBusFilter {
    /// Exchange name.
    pub exchange: String,
    /// Routing key or topic pattern.
    #[serde(default)]
    pub key: String,
    /// Exchange kind.
    pub exchange_type: ExchangeType,
    /// Whether the exchange is durable.
    pub durable: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form grouping label.
    #[serde(default)]
    pub category: Option<String>,
    /// Default template.
    #[serde(default)]
    pub template_id: Option<TemplateId>,
}

impl NewBusFilter {
    /// Materializes the filter under the given id.
    #[must_use]
    pub fn with_id(self, id: FilterId) -> BusFilter {
        BusFilter {
            id,
            exchange: self.exchange,
            key: self.key,
            exchange_type: self.exchange_type,
            durable: self.durable,
            description: self.description,
            category: self.category,
            template_id: self.template_id,
        }
    }
}

/// The `(exchange, key, type, durability)` tuple a consumer binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub struct Binding {
    /// Exchange name.
    pub exchange: String,
    /// Routing key or topic pattern.
    pub key: String,
    /// Exchange kind.
    pub exchange_type: ExchangeType,
    /// Exchange durability.
    pub durable: bool,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.exchange_type, self.exchange, self.key)
    }
}

/// A user's registration of interest in a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    /// Unique subscription identifier.
    pub id: SubscriptionId,
    /// Subscribed user.
    pub user_id: UserId,
    /// Watched filter.
    pub filter_id: FilterId,
    /// Template override for this subscription.
    #[serde(default)]
    pub template_id: Option<TemplateId>,
}

/// Fields supplied when creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewSubscription {
    /// Subscribing user.
    pub user_id: UserId,
    /// Filter to watch.
    pub filter_id: FilterId,
    /// Optional template override.
    #[serde(default)]
    pub template_id: Option<TemplateId>,
}

impl NewSubscription {
    /// Materializes the subscription under the given id.
    #[must_use]
    pub const fn with_id(self, id: SubscriptionId) -> Subscription {
        Subscription {
            id,
            user_id: self.user_id,
            filter_id: self.filter_id,
            template_id: self.template_id,
        }
    }
}

/// A subscription joined with its user and filter rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SubscriptionDetail {
    /// The subscription row.
    pub subscription: Subscription,
    /// Joined user.
    pub user: User,
    /// Joined filter.
    pub filter: BusFilter,
}

/// Named message template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Template {
    /// Unique template identifier.
    pub id: TemplateId,
    /// Human-readable name.
    pub name: String,
    /// Template text with `{{ placeholder }}` markers.
    pub text: String,
}

/// Fields supplied when creating or replacing a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewTemplate {
    /// Human-readable name.
    pub name: String,
    /// Template text.
    pub text: String,
}

/// A message delivered by the bus. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusMessage {
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key it was published with.
    pub routing_key: String,
    /// Raw payload.
    pub body: String,
    /// When the bus accepted the message.
    pub received_at: DateTime<Utc>,
}

impl BusMessage {
    /// Creates a message stamped with the current time.
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn exchange_type_parses_wire_names() {
        assert_eq!("direct".parse::<ExchangeType>(), Ok(ExchangeType::Direct));
        assert_eq!("topic".parse::<ExchangeType>(), Ok(ExchangeType::Topic));
        assert_eq!("fanout".parse::<ExchangeType>(), Ok(ExchangeType::Fanout));
        assert!("headers".parse::<ExchangeType>().is_err());
    }

    #[test]
    fn new_filter_defaults_optional_fields() {
        let json = r#"{"exchange":"notifications","exchange_type":"direct","durable":true}"#;
        let Ok(filter) = serde_json::from_str::<NewBusFilter>(json) else {
            panic!("valid filter");
        };
        assert_eq!(filter.key, "");
        assert!(filter.template_id.is_none());
    }

    #[test]
    fn binding_display_names_exchange_and_key() {
        let filter = NewBusFilter {
            exchange: "notifications".to_string(),
            key: "important".to_string(),
            exchange_type: ExchangeType::Direct,
            durable: true,
            description: None,
            category: None,
            template_id: None,
        }
        .with_id(FilterId::new());
        assert_eq!(filter.binding().to_string(), "direct:notifications/important");
    }
}
