//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root. With the `swagger-ui` feature the OpenAPI document is served at
//! `/api-docs/openapi.json` and browsable at `/swagger-ui`.

pub mod dto;
pub mod handlers;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document covering every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "busnotify",
        description = "Administrative API of the message-bus notification router."
    ),
    paths(
        handlers::system::health_handler,
        handlers::filters::create_filters,
        handlers::filters::list_filters,
        handlers::filters::get_filter,
        handlers::filters::update_filter,
        handlers::filters::delete_filter,
        handlers::filters::get_filter_template,
        handlers::filters::attach_template,
        handlers::filters::list_filter_users,
        handlers::filters::subscribe_user,
        handlers::users::create_user,
        handlers::users::list_users,
        handlers::users::get_user,
        handlers::users::update_user,
        handlers::users::delete_user,
        handlers::users::list_user_filters,
        handlers::subscriptions::create_subscription,
        handlers::subscriptions::list_subscriptions,
        handlers::subscriptions::get_subscription,
        handlers::subscriptions::update_subscription,
        handlers::subscriptions::delete_subscription,
        handlers::templates::create_template,
        handlers::templates::list_templates,
        handlers::templates::get_template,
        handlers::templates::update_template,
        handlers::templates::delete_template,
        handlers::runtime::list_consumers,
        handlers::runtime::publish,
    ),
    tags(
        (name = "Filters", description = "Bus filters, their default template and subscribers"),
        (name = "Users", description = "Notification recipients"),
        (name = "Subscriptions", description = "User to filter links"),
        (name = "Templates", description = "Message templates"),
        (name = "Runtime", description = "Live consumers and local bus injection"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}

/// Builds the full HTTP application: routes, middleware and shared state.
///
/// Requests running longer than `request_timeout` are answered with
/// `408 Request Timeout`.
pub fn app(state: AppState, request_timeout: Duration) -> Router {
    build_router()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(timeout_layer(request_timeout)),
        )
        .with_state(state)
}

fn timeout_layer(request_timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout)
}
