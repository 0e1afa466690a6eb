//! Service layer: business logic orchestration.
//!
//! [`AdminService`] validates administrative requests, applies them to the
//! stores and nudges the [`crate::engine::Orchestrator`] when a filter row
//! changes.

pub mod admin_service;

pub use admin_service::AdminService;
