//! Change-feed events over the subscription store.

use serde::{Deserialize, Serialize};

use super::{FilterId, Subscription};

/// One entry of a store change feed: the row before and after the change.
///
/// `old` absent means the row was created, `new` absent means it was
/// deleted, both present means it was updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<T> {
    /// Row value before the change.
    pub old: Option<T>,
    /// Row value after the change.
    pub new: Option<T>,
}

/// A change to the subscriptions table.
pub type SubscriptionChange = Change<Subscription>;

/// Classified form of a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind<'a, T> {
    /// Row inserted.
    Created(&'a T),
    /// Row modified in place.
    Updated {
        /// Previous value.
        old: &'a T,
        /// Current value.
        new: &'a T,
    },
    /// Row removed.
    Deleted(&'a T),
}

impl<T> Change<T> {
    /// Builds a creation event.
    #[must_use]
    pub fn created(new: T) -> Self {
        Self {
            old: None,
            new: Some(new),
        }
    }

    /// Builds an update event.
    #[must_use]
    pub fn updated(old: T, new: T) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }

    /// Builds a deletion event.
    #[must_use]
    pub fn deleted(old: T) -> Self {
        Self {
            old: Some(old),
            new: None,
        }
    }

    /// Classifies the event. Returns `None` for an empty `{old: null, new:
    /// null}` event, which carries nothing to reconcile.
    #[must_use]
    pub fn kind(&self) -> Option<ChangeKind<'_, T>> {
        match (&self.old, &self.new) {
            (None, Some(new)) => Some(ChangeKind::Created(new)),
            (Some(old), Some(new)) => Some(ChangeKind::Updated { old, new }),
            (Some(old), None) => Some(ChangeKind::Deleted(old)),
            (None, None) => None,
        }
    }
}

impl SubscriptionChange {
    /// Returns the filters whose subscriber set this change may have altered.
    ///
    /// An update that moves a subscription to another filter touches both
    /// the old and the new filter; the old one is listed first.
    #[must_use]
    pub fn affected_filters(&self) -> Vec<FilterId> {
        match self.kind() {
            Some(ChangeKind::Created(new)) => vec![new.filter_id],
            Some(ChangeKind::Deleted(old)) => vec![old.filter_id],
            Some(ChangeKind::Updated { old, new }) if old.filter_id != new.filter_id => {
                vec![old.filter_id, new.filter_id]
            }
            Some(ChangeKind::Updated { new, .. }) => vec![new.filter_id],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SubscriptionId, TemplateId, UserId};

    fn subscription(filter_id: FilterId) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            user_id: UserId::new(),
            filter_id,
            template_id: None,
        }
    }

    #[test]
    fn create_touches_new_filter() {
        let filter = FilterId::new();
        let change = SubscriptionChange::created(subscription(filter));
        assert!(matches!(change.kind(), Some(ChangeKind::Created(_))));
        assert_eq!(change.affected_filters(), vec![filter]);
    }

    #[test]
    fn delete_touches_old_filter() {
        let filter = FilterId::new();
        let change = SubscriptionChange::deleted(subscription(filter));
        assert!(matches!(change.kind(), Some(ChangeKind::Deleted(_))));
        assert_eq!(change.affected_filters(), vec![filter]);
    }

    #[test]
    fn template_update_touches_single_filter() {
        let filter = FilterId::new();
        let old = subscription(filter);
        let mut new = old.clone();
        new.template_id = Some(TemplateId::new());
        let change = SubscriptionChange::updated(old, new);
        assert_eq!(change.affected_filters(), vec![filter]);
    }

    #[test]
    fn moving_filter_touches_old_then_new() {
        let from = FilterId::new();
        let to = FilterId::new();
        let old = subscription(from);
        let mut new = old.clone();
        new.filter_id = to;
        let change = SubscriptionChange::updated(old, new);
        assert_eq!(change.affected_filters(), vec![from, to]);
    }

    #[test]
    fn empty_change_touches_nothing() {
        let change: SubscriptionChange = Change {
            old: None,
            new: None,
        };
        assert!(change.kind().is_none());
        assert!(change.affected_filters().is_empty());
    }
}
