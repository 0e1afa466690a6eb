//! DTOs for the local bus injection endpoint.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::BusMessage;

/// Request body for `POST /bus/publish`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PublishRequest {
    /// Target exchange. Must have been declared by a consumer.
    pub exchange: String,
    /// Routing key. Ignored by fanout exchanges.
    #[serde(default)]
    pub routing_key: String,
    /// Raw message body.
    pub body: String,
}

impl PublishRequest {
    /// Converts the request into a bus message stamped now.
    #[must_use]
    pub fn into_message(self) -> BusMessage {
        BusMessage::new(self.exchange, self.routing_key, self.body)
    }
}

/// Response body for `POST /bus/publish`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct PublishResponse {
    /// Number of consumer queues that accepted the message.
    pub queued: usize,
}
