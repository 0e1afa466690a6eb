//! # busnotify
//!
//! Routes messages arriving on a message bus to the users subscribed to
//! them, rendered through per-filter or per-subscription templates.
//!
//! Each *filter* describes a slice of bus traffic (`exchange`, routing key,
//! exchange type). Filters with at least one subscription get exactly one
//! live bus consumer; the orchestrator keeps that set in line with the
//! stored subscriptions by following their change feed.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── AdminService (service/)
//!     │
//!     ├── Stores (store/) ── memory or PostgreSQL
//!     │       │
//!     │       └── change feed
//!     │               │
//!     ├── Orchestrator (engine/) ── ConsumerRegistry
//!     │                                 │
//!     │                                 └── BusConsumer (bus/) ── Dispatcher
//!     │                                                               │
//!     └── NotificationTransport (transport/) ◄───────────────────────┘
//! ```

pub mod api;
pub mod app_state;
pub mod bus;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod service;
pub mod store;
pub mod transport;
