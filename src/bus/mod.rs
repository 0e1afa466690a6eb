//! Message-bus capability interfaces.
//!
//! The routing engine talks to the broker only through [`BusConnector`]
//! and [`BusConnection`]. [`LocalBus`] is the in-process implementation
//! shipped with the router.

pub mod local;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{Binding, BusMessage};

pub use local::LocalBus;

/// Process-unique identity of one bus connection.
///
/// Used to observe that a snapshot refresh kept the same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw connection number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw connection number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors raised while binding to or publishing on the bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The exchange exists with a different type or durability.
    #[error(
        "exchange {exchange} is declared as {declared}, cannot redeclare as {requested}"
    )]
    ExchangeMismatch {
        /// Exchange name.
        exchange: String,
        /// Existing declaration.
        declared: String,
        /// Declaration requested by the caller.
        requested: String,
    },

    /// Publish target was never declared.
    #[error("exchange not found: {0}")]
    UnknownExchange(String),
}

/// Opens bus connections bound to a single filter.
#[async_trait]
pub trait BusConnector: Send + Sync + fmt::Debug {
    /// Declares the binding's exchange and opens a connection whose queue
    /// receives every message routed through `binding`.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] if the exchange cannot be declared or the
    /// queue cannot be bound.
    async fn connect(&self, binding: &Binding) -> Result<Box<dyn BusConnection>, BusError>;
}

/// One live, exclusively owned connection to the bus.
#[async_trait]
pub trait BusConnection: Send + fmt::Debug {
    /// Identity of this connection.
    fn id(&self) -> ConnectionId;

    /// Waits for the next message. `None` means the connection is closed.
    ///
    /// Must be cancel-safe: dropping the future before it completes never
    /// loses a message.
    async fn receive(&mut self) -> Option<BusMessage>;

    /// Unbinds the queue and releases the connection. Idempotent.
    async fn close(&mut self);
}
