//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::AdminService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Admin service for all business logic.
    pub service: Arc<AdminService>,
}

impl AppState {
    /// Wraps the service for sharing across handlers.
    #[must_use]
    pub fn new(service: AdminService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
