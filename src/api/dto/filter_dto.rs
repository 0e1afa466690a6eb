//! Filter DTOs: batch creation, listing and user subscription.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common_dto::PaginationMeta;
use crate::domain::{BusFilter, FilterId, NewBusFilter, TemplateId};
use crate::store::FilterInsert;

/// Request body for `POST /filters`: one filter or an array of filters.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum FilterBatch {
    /// A single filter.
    One(NewBusFilter),
    /// Several filters inserted in order.
    Many(Vec<NewBusFilter>),
}

impl FilterBatch {
    /// Returns `true` if the request carried an array.
    #[must_use]
    pub const fn is_many(&self) -> bool {
        matches!(self, Self::Many(_))
    }

    /// Flattens the batch into a list.
    #[must_use]
    pub fn into_vec(self) -> Vec<NewBusFilter> {
        match self {
            Self::One(filter) => vec![filter],
            Self::Many(filters) => filters,
        }
    }
}

/// Result of inserting one filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FilterCreatedDto {
    /// Id of the new filter, or of the existing filter with the same
    /// `(exchange, key)`.
    pub id: FilterId,
    /// `false` if the filter already existed.
    pub created: bool,
}

impl From<FilterInsert> for FilterCreatedDto {
    fn from(insert: FilterInsert) -> Self {
        Self {
            id: insert.id(),
            created: matches!(insert, FilterInsert::Created(_)),
        }
    }
}

/// Response body for `POST /filters`, mirroring the request shape.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum FilterCreatedResponse {
    /// Result for a single-object request.
    One(FilterCreatedDto),
    /// Results for an array request, in request order.
    Many(Vec<FilterCreatedDto>),
}

/// Paginated list response for `GET /filters`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FilterListResponse {
    /// Filters on this page.
    pub data: Vec<BusFilter>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Request body for `POST /filters/{id}/users`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubscribeUserRequest {
    /// User name; matched together with the email against existing users.
    pub name: String,
    /// Delivery address.
    pub email: String,
    /// Optional template override for the new subscription.
    #[serde(default)]
    pub template_id: Option<TemplateId>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn batch_accepts_single_object() {
        let json = r#"{"exchange":"notifications","key":"important","exchange_type":"direct","durable":true}"#;
        let Ok(batch) = serde_json::from_str::<FilterBatch>(json) else {
            panic!("single filter should parse");
        };
        assert!(!batch.is_many());
        assert_eq!(batch.into_vec().len(), 1);
    }

    #[test]
    fn batch_accepts_array() {
        let json = r#"[
            {"exchange":"notifications","key":"a","exchange_type":"direct","durable":true},
            {"exchange":"broadcast","exchange_type":"fanout","durable":false}
        ]"#;
        let Ok(batch) = serde_json::from_str::<FilterBatch>(json) else {
            panic!("filter array should parse");
        };
        assert!(batch.is_many());
        let filters = batch.into_vec();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters.get(1).map(|f| f.key.as_str()), Some(""));
    }

    #[test]
    fn existing_insert_is_not_created() {
        let id = FilterId::new();
        let dto = FilterCreatedDto::from(FilterInsert::Existing(id));
        assert_eq!(dto, FilterCreatedDto { id, created: false });
    }
}
