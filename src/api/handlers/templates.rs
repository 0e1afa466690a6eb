//! Template handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{PaginationParams, TemplateListResponse};
use crate::app_state::AppState;
use crate::domain::{NewTemplate, Template, TemplateId};
use crate::error::{ApiError, ErrorResponse};

/// `POST /templates`: Create a template.
///
/// # Errors
///
/// Returns [`ApiError::Validation`] on a blank name.
#[utoipa::path(
    post,
    path = "/api/v1/templates",
    tag = "Templates",
    summary = "Create a template",
    description = "Templates use `{{ placeholder }}` markers. Available placeholders: `body`, `message.*` (including `message.payload.*` for JSON bodies), `user.*` and `filter.*`.",
    request_body = NewTemplate,
    responses(
        (status = 201, description = "Template created", body = Template),
        (status = 422, description = "Invalid template", body = ErrorResponse),
    )
)]
pub async fn create_template(
    State(state): State<AppState>,
    Json(template): Json<NewTemplate>,
) -> Result<impl IntoResponse, ApiError> {
    let template = state.service.create_template(template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// `GET /templates`: List templates.
///
/// # Errors
///
/// Returns [`ApiError::PersistenceError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/templates",
    tag = "Templates",
    summary = "List templates",
    params(PaginationParams),
    responses(
        (status = 200, description = "Paginated template list", body = TemplateListResponse),
    )
)]
pub async fn list_templates(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (data, pagination) = params.apply(state.service.list_templates().await?);
    Ok(Json(TemplateListResponse { data, pagination }))
}

/// `GET /templates/{id}`: Get one template.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the template does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}",
    tag = "Templates",
    summary = "Get a template",
    params(("id" = uuid::Uuid, Path, description = "Template UUID")),
    responses(
        (status = 200, description = "Template", body = Template),
        (status = 404, description = "Template not found", body = ErrorResponse),
    )
)]
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_template(TemplateId::from(id)).await?))
}

/// `PUT /templates/{id}`: Replace a template.
///
/// Takes effect from the next dispatched message.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the template does not exist.
#[utoipa::path(
    put,
    path = "/api/v1/templates/{id}",
    tag = "Templates",
    summary = "Update a template",
    params(("id" = uuid::Uuid, Path, description = "Template UUID")),
    request_body = NewTemplate,
    responses(
        (status = 200, description = "Updated template", body = Template),
        (status = 404, description = "Template not found", body = ErrorResponse),
        (status = 422, description = "Invalid template", body = ErrorResponse),
    )
)]
pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(template): Json<NewTemplate>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .service
            .update_template(TemplateId::from(id), template)
            .await?,
    ))
}

/// `DELETE /templates/{id}`: Delete a template.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the template does not exist.
#[utoipa::path(
    delete,
    path = "/api/v1/templates/{id}",
    tag = "Templates",
    summary = "Delete a template",
    description = "References from filters and subscriptions are kept; messages for them are skipped until a template is attached again.",
    params(("id" = uuid::Uuid, Path, description = "Template UUID")),
    responses(
        (status = 204, description = "Template deleted"),
        (status = 404, description = "Template not found", body = ErrorResponse),
    )
)]
pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_template(TemplateId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Template routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/{id}",
            get(get_template).put(update_template).delete(delete_template),
        )
}
