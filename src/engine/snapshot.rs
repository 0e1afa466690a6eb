//! Immutable view of one filter's subscribers.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{BusFilter, SubscriptionDetail, SubscriptionId, TemplateId, User};

/// One recipient of a filter's traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Subscriber {
    /// Subscription that produced this recipient.
    pub subscription_id: SubscriptionId,
    /// Recipient.
    pub user: User,
    /// Subscription-level template override.
    pub template_id: Option<TemplateId>,
}

/// The filter row and its subscribers at one point in time.
///
/// Consumers read the latest snapshot for every inbound message; a refresh
/// swaps in a new snapshot without touching the bus connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SubscriberSnapshot {
    /// Filter row the consumer is bound to.
    pub filter: BusFilter,
    /// Current subscribers.
    pub subscribers: Vec<Subscriber>,
}

impl SubscriberSnapshot {
    /// Builds a snapshot from joined subscription rows of `filter`.
    #[must_use]
    pub fn new(filter: BusFilter, details: Vec<SubscriptionDetail>) -> Self {
        let subscribers = details
            .into_iter()
            .map(|detail| Subscriber {
                subscription_id: detail.subscription.id,
                user: detail.user,
                template_id: detail.subscription.template_id,
            })
            .collect();
        Self {
            filter,
            subscribers,
        }
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns `true` if nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
