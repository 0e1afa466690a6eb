//! Runtime endpoints: live consumers and local bus injection.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{PublishRequest, PublishResponse};
use crate::app_state::AppState;
use crate::engine::ConsumerInfo;
use crate::error::{ApiError, ErrorResponse};

/// `GET /consumers`: Current consumer registry.
#[utoipa::path(
    get,
    path = "/api/v1/consumers",
    tag = "Runtime",
    summary = "List live consumers",
    description = "One entry per filter that currently has subscribers, ordered by filter id.",
    responses(
        (status = 200, description = "Live consumers", body = Vec<ConsumerInfo>),
    )
)]
pub async fn list_consumers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.consumers())
}

/// `POST /bus/publish`: Inject a message into the local bus.
///
/// # Errors
///
/// Returns [`ApiError::Validation`] on a blank exchange and
/// [`ApiError::Bus`] when the exchange has never been declared.
#[utoipa::path(
    post,
    path = "/api/v1/bus/publish",
    tag = "Runtime",
    summary = "Publish a bus message",
    description = "Routes the message to every consumer bound to a matching key. Exchanges are declared by consumers, so publishing before any filter has a subscriber fails with 404.",
    request_body = PublishRequest,
    responses(
        (status = 202, description = "Message queued", body = PublishResponse),
        (status = 404, description = "Exchange not declared", body = ErrorResponse),
        (status = 422, description = "Invalid message", body = ErrorResponse),
    )
)]
pub async fn publish(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let queued = state.service.publish(&req.into_message())?;
    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(PublishResponse { queued }),
    ))
}

/// Runtime routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/consumers", get(list_consumers))
        .route("/bus/publish", post(publish))
}
