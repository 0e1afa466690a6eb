//! Domain layer: entity types, identifiers and the change feed.
//!
//! This module contains the data model shared by the stores, the
//! administrative API and the routing engine, plus the change events the
//! subscription store emits and the broadcast feed that carries them.

pub mod change;
pub mod change_feed;
pub mod ids;
pub mod models;

pub use change::{Change, ChangeKind, SubscriptionChange};
pub use change_feed::{ChangeFeed, ChangeStream, FeedError};
pub use ids::{FilterId, SubscriptionId, TemplateId, UserId};
pub use models::{
    Binding, BusFilter, BusMessage, ExchangeType, NewBusFilter, NewSubscription, NewTemplate, NewUser,
    Subscription, SubscriptionDetail, Template, User,
};
