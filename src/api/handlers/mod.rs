//! REST endpoint handlers organized by resource.

pub mod filters;
pub mod runtime;
pub mod subscriptions;
pub mod system;
pub mod templates;
pub mod users;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(filters::routes())
        .merge(users::routes())
        .merge(subscriptions::routes())
        .merge(templates::routes())
        .merge(runtime::routes())
}
