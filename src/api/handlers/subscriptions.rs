//! Subscription handlers.
//!
//! Writes here are picked up by the orchestrator through the change feed;
//! nothing is forwarded explicitly.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{PaginationParams, SubscriptionListResponse};
use crate::app_state::AppState;
use crate::domain::{NewSubscription, Subscription, SubscriptionId};
use crate::error::{ApiError, ErrorResponse};

/// `POST /subscriptions`: Create a subscription.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the user or filter does not exist.
#[utoipa::path(
    post,
    path = "/api/v1/subscriptions",
    tag = "Subscriptions",
    summary = "Create a subscription",
    request_body = NewSubscription,
    responses(
        (status = 201, description = "Subscription created", body = Subscription),
        (status = 404, description = "User or filter not found", body = ErrorResponse),
    )
)]
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(subscription): Json<NewSubscription>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state.service.create_subscription(subscription).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// `GET /subscriptions`: List subscriptions with their user and filter.
///
/// # Errors
///
/// Returns [`ApiError::PersistenceError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions",
    tag = "Subscriptions",
    summary = "List subscriptions",
    params(PaginationParams),
    responses(
        (status = 200, description = "Paginated subscription list", body = SubscriptionListResponse),
    )
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (data, pagination) = params.apply(state.service.list_subscriptions().await?);
    Ok(Json(SubscriptionListResponse { data, pagination }))
}

/// `GET /subscriptions/{id}`: Get one subscription.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the subscription does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/{id}",
    tag = "Subscriptions",
    summary = "Get a subscription",
    params(("id" = uuid::Uuid, Path, description = "Subscription UUID")),
    responses(
        (status = 200, description = "Subscription", body = Subscription),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
    )
)]
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .service
            .get_subscription(SubscriptionId::from(id))
            .await?,
    ))
}

/// `PUT /subscriptions/{id}`: Replace a subscription.
///
/// Moving a subscription to another filter reconciles both filters.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the subscription, user or filter
/// does not exist.
#[utoipa::path(
    put,
    path = "/api/v1/subscriptions/{id}",
    tag = "Subscriptions",
    summary = "Update a subscription",
    params(("id" = uuid::Uuid, Path, description = "Subscription UUID")),
    request_body = NewSubscription,
    responses(
        (status = 200, description = "Updated subscription", body = Subscription),
        (status = 404, description = "Subscription, user or filter not found", body = ErrorResponse),
    )
)]
pub async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(subscription): Json<NewSubscription>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .service
            .update_subscription(SubscriptionId::from(id), subscription)
            .await?,
    ))
}

/// `DELETE /subscriptions/{id}`: Delete a subscription.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the subscription does not exist.
#[utoipa::path(
    delete,
    path = "/api/v1/subscriptions/{id}",
    tag = "Subscriptions",
    summary = "Delete a subscription",
    description = "Deleting the last subscription of a filter stops its consumer.",
    params(("id" = uuid::Uuid, Path, description = "Subscription UUID")),
    responses(
        (status = 204, description = "Subscription deleted"),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
    )
)]
pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .delete_subscription(SubscriptionId::from(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Subscription routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route(
            "/subscriptions/{id}",
            get(get_subscription)
                .put(update_subscription)
                .delete(delete_subscription),
        )
}
