//! Outbound notification transports.
//!
//! The dispatcher hands every rendered notification to a
//! [`NotificationTransport`]. Three implementations ship with the router:
//!
//! - [`LogTransport`]: writes each delivery to the log.
//! - [`MemoryTransport`]: keeps deliveries in an in-memory outbox.
//! - [`WebhookTransport`]: posts each delivery as JSON over HTTP.

pub mod logger;
pub mod memory;
pub mod webhook;

use std::fmt::Debug;

use async_trait::async_trait;

pub use logger::LogTransport;
pub use memory::{Delivery, MemoryTransport};
pub use webhook::WebhookTransport;

/// Errors that can occur while sending a notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent.
    #[error("transport request error: {0}")]
    Request(String),

    /// The remote endpoint rejected the delivery.
    #[error("transport rejected delivery (status {status}): {body}")]
    Rejected {
        /// HTTP status code returned by the endpoint.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The send did not complete within the configured bound.
    #[error("send timed out after {0} ms")]
    Timeout(u64),
}

/// Sends one rendered message to one recipient address.
#[async_trait]
pub trait NotificationTransport: Send + Sync + Debug {
    /// Delivers `body` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the delivery fails.
    async fn send(&self, recipient: &str, body: &str) -> Result<(), TransportError>;
}
