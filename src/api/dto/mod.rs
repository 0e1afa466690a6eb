//! Data Transfer Objects for REST request/response serialization.
//!
//! Entities are returned as their domain types; the DTOs here cover
//! request shapes and list envelopes that have no domain counterpart.

pub mod bus_dto;
pub mod common_dto;
pub mod filter_dto;
pub mod resource_dto;

pub use bus_dto::*;
pub use common_dto::*;
pub use filter_dto::*;
pub use resource_dto::*;
