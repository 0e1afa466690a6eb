//! Transport that only logs deliveries.

use async_trait::async_trait;

use super::{NotificationTransport, TransportError};

/// Logs every delivery at `info` level. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), TransportError> {
        tracing::info!(%recipient, bytes = body.len(), body = %body, "notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_always_succeeds() {
        assert_eq!(LogTransport.send("demo@example.com", "hello").await, Ok(()));
    }
}
