//! List responses for users, subscriptions and templates.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common_dto::PaginationMeta;
use crate::domain::{SubscriptionDetail, Template, User};

/// Paginated list response for `GET /users`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    /// Users on this page.
    pub data: Vec<User>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Paginated list response for `GET /subscriptions`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionListResponse {
    /// Subscriptions joined with their user and filter.
    pub data: Vec<SubscriptionDetail>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Paginated list response for `GET /templates`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TemplateListResponse {
    /// Templates on this page.
    pub data: Vec<Template>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}
