//! User handlers: CRUD and subscribed filters.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{PaginationParams, UserListResponse};
use crate::app_state::AppState;
use crate::domain::{BusFilter, NewUser, User, UserId};
use crate::error::{ApiError, ErrorResponse};

/// `POST /users`: Create a user.
///
/// # Errors
///
/// Returns [`ApiError::Validation`] on blank fields.
#[utoipa::path(
    post,
    path = "/api/v1/users",
    tag = "Users",
    summary = "Create a user",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 422, description = "Invalid user", body = ErrorResponse),
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.service.create_user(user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `GET /users`: List users.
///
/// # Errors
///
/// Returns [`ApiError::PersistenceError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "Users",
    summary = "List users",
    params(PaginationParams),
    responses(
        (status = 200, description = "Paginated user list", body = UserListResponse),
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (data, pagination) = params.apply(state.service.list_users().await?);
    Ok(Json(UserListResponse { data, pagination }))
}

/// `GET /users/{id}`: Get one user.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the user does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    tag = "Users",
    summary = "Get a user",
    params(("id" = uuid::Uuid, Path, description = "User UUID")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_user(UserId::from(id)).await?))
}

/// `PUT /users/{id}`: Replace a user.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the user does not exist.
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    tag = "Users",
    summary = "Update a user",
    params(("id" = uuid::Uuid, Path, description = "User UUID")),
    request_body = NewUser,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 422, description = "Invalid user", body = ErrorResponse),
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(user): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.update_user(UserId::from(id), user).await?))
}

/// `DELETE /users/{id}`: Delete a user and its subscriptions.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the user does not exist.
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    tag = "Users",
    summary = "Delete a user",
    params(("id" = uuid::Uuid, Path, description = "User UUID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_user(UserId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /users/{id}/filters`: Filters the user is subscribed to.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the user does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/filters",
    tag = "Users",
    summary = "List a user's filters",
    params(("id" = uuid::Uuid, Path, description = "User UUID")),
    responses(
        (status = 200, description = "Subscribed filters", body = Vec<BusFilter>),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn list_user_filters(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.user_filters(UserId::from(id)).await?))
}

/// User routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/users/{id}/filters", get(list_user_filters))
}
