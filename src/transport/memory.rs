//! Transport that records deliveries in memory.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, RwLock};

use super::{NotificationTransport, TransportError};

/// One recorded delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    /// Recipient address.
    pub recipient: String,
    /// Rendered body.
    pub body: String,
    /// When the delivery was recorded.
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Outbox {
    deliveries: RwLock<Vec<Delivery>>,
    changed: Notify,
}

/// Keeps every delivery in an outbox that can be inspected later.
///
/// Cloning yields another handle to the same outbox. The outbox is never
/// drained, so this transport is meant for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    outbox: Arc<Outbox>,
}

impl MemoryTransport {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every delivery so far, in arrival order.
    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.outbox.deliveries.read().await.clone()
    }

    /// Returns the number of deliveries so far.
    pub async fn len(&self) -> usize {
        self.outbox.deliveries.read().await.len()
    }

    /// Returns `true` if nothing was delivered yet.
    pub async fn is_empty(&self) -> bool {
        self.outbox.deliveries.read().await.is_empty()
    }

    /// Waits until at least `count` deliveries were recorded.
    pub async fn wait_for(&self, count: usize) -> Vec<Delivery> {
        loop {
            let changed = self.outbox.changed.notified();
            {
                let deliveries = self.outbox.deliveries.read().await;
                if deliveries.len() >= count {
                    return deliveries.clone();
                }
            }
            changed.await;
        }
    }
}

#[async_trait]
impl NotificationTransport for MemoryTransport {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), TransportError> {
        self.outbox.deliveries.write().await.push(Delivery {
            recipient: recipient.to_string(),
            body: body.to_string(),
            sent_at: Utc::now(),
        });
        self.outbox.changed.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_records_delivery() {
        let transport = MemoryTransport::new();
        assert!(transport.is_empty().await);

        assert!(transport.send("u@example.com", "hello").await.is_ok());

        let deliveries = transport.deliveries().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries.first().map(|d| d.recipient.as_str()), Some("u@example.com"));
        assert_eq!(deliveries.first().map(|d| d.body.as_str()), Some("hello"));
    }

    #[tokio::test]
    async fn wait_for_returns_once_count_reached() {
        let transport = MemoryTransport::new();
        let sender = transport.clone();
        tokio::spawn(async move {
            for i in 0..3 {
                let _ = sender.send("u@example.com", &i.to_string()).await;
            }
        });

        let deliveries = transport.wait_for(3).await;
        assert_eq!(deliveries.len(), 3);
    }
}
