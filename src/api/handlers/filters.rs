//! Filter handlers: CRUD, default template and subscribers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{
    FilterBatch, FilterCreatedDto, FilterCreatedResponse, FilterListResponse, PaginationParams,
    SubscribeUserRequest,
};
use crate::app_state::AppState;
use crate::domain::{
    BusFilter, FilterId, NewBusFilter, NewTemplate, NewUser, SubscriptionDetail, Template,
};
use crate::error::{ApiError, ErrorResponse};

/// `POST /filters`: Create one filter or a batch.
///
/// Responds `201` if at least one filter was inserted and `200` if every
/// filter already existed. The body mirrors the request shape.
///
/// # Errors
///
/// Returns [`ApiError::Validation`] if any filter is invalid.
#[utoipa::path(
    post,
    path = "/api/v1/filters",
    tag = "Filters",
    summary = "Create filters",
    description = "Inserts one filter or an array of filters. A filter whose `(exchange, key)` already exists is not duplicated; its existing id is returned with `created: false`.",
    request_body = FilterBatch,
    responses(
        (status = 201, description = "At least one filter created", body = FilterCreatedResponse),
        (status = 200, description = "All filters already existed", body = FilterCreatedResponse),
        (status = 422, description = "Invalid filter", body = ErrorResponse),
    )
)]
pub async fn create_filters(
    State(state): State<AppState>,
    Json(batch): Json<FilterBatch>,
) -> Result<impl IntoResponse, ApiError> {
    let many = batch.is_many();
    let results: Vec<FilterCreatedDto> = state
        .service
        .create_filters(batch.into_vec())
        .await?
        .into_iter()
        .map(FilterCreatedDto::from)
        .collect();

    let status = if results.iter().any(|r| r.created) {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = if many {
        FilterCreatedResponse::Many(results)
    } else {
        results.into_iter().next().map_or_else(
            || FilterCreatedResponse::Many(Vec::new()),
            FilterCreatedResponse::One,
        )
    };
    Ok((status, Json(body)))
}

/// `GET /filters`: List filters.
///
/// # Errors
///
/// Returns [`ApiError::PersistenceError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/filters",
    tag = "Filters",
    summary = "List filters",
    params(PaginationParams),
    responses(
        (status = 200, description = "Paginated filter list", body = FilterListResponse),
    )
)]
pub async fn list_filters(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (data, pagination) = params.apply(state.service.list_filters().await?);
    Ok(Json(FilterListResponse { data, pagination }))
}

/// `GET /filters/{id}`: Get one filter.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the filter does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/filters/{id}",
    tag = "Filters",
    summary = "Get a filter",
    params(("id" = uuid::Uuid, Path, description = "Filter UUID")),
    responses(
        (status = 200, description = "Filter", body = BusFilter),
        (status = 404, description = "Filter not found", body = ErrorResponse),
    )
)]
pub async fn get_filter(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_filter(FilterId::from(id)).await?))
}

/// `PUT /filters/{id}`: Replace a filter.
///
/// A running consumer for the filter is rebound or refreshed.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the filter does not exist and
/// [`ApiError::Conflict`] if the new binding is already taken.
#[utoipa::path(
    put,
    path = "/api/v1/filters/{id}",
    tag = "Filters",
    summary = "Update a filter",
    description = "Replaces every field of the filter. A live consumer picks up the change without waiting for a subscription edit.",
    params(("id" = uuid::Uuid, Path, description = "Filter UUID")),
    request_body = NewBusFilter,
    responses(
        (status = 200, description = "Updated filter", body = BusFilter),
        (status = 404, description = "Filter not found", body = ErrorResponse),
        (status = 409, description = "Binding already used by another filter", body = ErrorResponse),
        (status = 422, description = "Invalid filter", body = ErrorResponse),
    )
)]
pub async fn update_filter(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(filter): Json<NewBusFilter>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state.service.update_filter(FilterId::from(id), filter).await?,
    ))
}

/// `DELETE /filters/{id}`: Delete a filter and its subscriptions.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the filter does not exist.
#[utoipa::path(
    delete,
    path = "/api/v1/filters/{id}",
    tag = "Filters",
    summary = "Delete a filter",
    description = "Deletes the filter. Its subscriptions are removed with it, which stops its consumer.",
    params(("id" = uuid::Uuid, Path, description = "Filter UUID")),
    responses(
        (status = 204, description = "Filter deleted"),
        (status = 404, description = "Filter not found", body = ErrorResponse),
    )
)]
pub async fn delete_filter(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_filter(FilterId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /filters/{id}/template`: Get the filter's default template.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the filter or its template is missing.
#[utoipa::path(
    get,
    path = "/api/v1/filters/{id}/template",
    tag = "Filters",
    summary = "Get the filter template",
    params(("id" = uuid::Uuid, Path, description = "Filter UUID")),
    responses(
        (status = 200, description = "Default template", body = Template),
        (status = 404, description = "Filter or template not found", body = ErrorResponse),
    )
)]
pub async fn get_filter_template(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.filter_template(FilterId::from(id)).await?))
}

/// `POST /filters/{id}/template`: Create a template and attach it.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the filter does not exist.
#[utoipa::path(
    post,
    path = "/api/v1/filters/{id}/template",
    tag = "Filters",
    summary = "Attach a new template",
    params(("id" = uuid::Uuid, Path, description = "Filter UUID")),
    request_body = NewTemplate,
    responses(
        (status = 201, description = "Template created and attached", body = Template),
        (status = 404, description = "Filter not found", body = ErrorResponse),
        (status = 422, description = "Invalid template", body = ErrorResponse),
    )
)]
pub async fn attach_template(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(template): Json<NewTemplate>,
) -> Result<impl IntoResponse, ApiError> {
    let template = state
        .service
        .attach_template(FilterId::from(id), template)
        .await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// `GET /filters/{id}/users`: List a filter's subscriptions.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the filter does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/filters/{id}/users",
    tag = "Filters",
    summary = "List filter subscribers",
    params(("id" = uuid::Uuid, Path, description = "Filter UUID")),
    responses(
        (status = 200, description = "Subscriptions of the filter", body = Vec<SubscriptionDetail>),
        (status = 404, description = "Filter not found", body = ErrorResponse),
    )
)]
pub async fn list_filter_users(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state.service.filter_subscribers(FilterId::from(id)).await?,
    ))
}

/// `POST /filters/{id}/users`: Subscribe a user, creating it if needed.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the filter does not exist.
#[utoipa::path(
    post,
    path = "/api/v1/filters/{id}/users",
    tag = "Filters",
    summary = "Subscribe a user",
    description = "Looks up the user by name and email, creates it if absent, and subscribes it to the filter.",
    params(("id" = uuid::Uuid, Path, description = "Filter UUID")),
    request_body = SubscribeUserRequest,
    responses(
        (status = 201, description = "Subscription created", body = SubscriptionDetail),
        (status = 404, description = "Filter not found", body = ErrorResponse),
        (status = 422, description = "Invalid user", body = ErrorResponse),
    )
)]
pub async fn subscribe_user(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<SubscribeUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = NewUser {
        name: req.name,
        email: req.email,
    };
    let detail = state
        .service
        .subscribe(FilterId::from(id), user, req.template_id)
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// Filter routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/filters", get(list_filters).post(create_filters))
        .route(
            "/filters/{id}",
            get(get_filter).put(update_filter).delete(delete_filter),
        )
        .route(
            "/filters/{id}/template",
            get(get_filter_template).post(attach_template),
        )
        .route(
            "/filters/{id}/users",
            get(list_filter_users).post(subscribe_user),
        )
}
