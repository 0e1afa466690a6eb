//! Transport that posts deliveries to an HTTP endpoint.

use async_trait::async_trait;
use serde::Serialize;

use super::{NotificationTransport, TransportError};

/// JSON body posted for every delivery.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    /// Recipient address.
    pub to: &'a str,
    /// Rendered body.
    pub body: &'a str,
}

/// Posts `{"to", "body"}` to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    http: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    /// Creates a transport posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Creates a transport from a pre-built HTTP client.
    #[must_use]
    pub fn with_client(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    /// Returns the target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), TransportError> {
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookPayload {
                to: recipient,
                body,
            })
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(%recipient, status = status.as_u16(), "webhook delivery accepted");
            Ok(())
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            tracing::warn!(status = status.as_u16(), body = %body, "webhook rejected delivery");
            Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use tokio::sync::Mutex;

    use super::*;

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    /// Serves a hook that records payloads and answers with `status`.
    async fn receiver(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(received): State<Received>,
                          axum::Json(payload): axum::Json<serde_json::Value>| async move {
                        received.lock().await.push(payload);
                        (status, "nope")
                    },
                ),
            )
            .with_state(Arc::clone(&received));
        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local address");
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/hook"), received)
    }

    #[tokio::test]
    async fn posts_payload_to_endpoint() {
        let (url, received) = receiver(StatusCode::NO_CONTENT).await;
        let transport = WebhookTransport::new(url);

        assert_eq!(transport.send("u@example.com", "hello").await, Ok(()));
        assert_eq!(
            received.lock().await.as_slice(),
            [serde_json::json!({"to": "u@example.com", "body": "hello"})]
        );
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let (url, _) = receiver(StatusCode::SERVICE_UNAVAILABLE).await;
        let transport = WebhookTransport::new(url);

        assert_eq!(
            transport.send("u@example.com", "hello").await,
            Err(TransportError::Rejected {
                status: 503,
                body: "nope".to_string(),
            })
        );
    }

    #[test]
    fn payload_serializes_to_and_body() {
        let Ok(json) = serde_json::to_value(WebhookPayload {
            to: "u@example.com",
            body: "hi",
        }) else {
            panic!("payload should serialize");
        };
        assert_eq!(json, serde_json::json!({"to": "u@example.com", "body": "hi"}));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_request_error() {
        let transport = WebhookTransport::new("http://127.0.0.1:9/hook");
        assert_eq!(transport.url(), "http://127.0.0.1:9/hook");
        assert!(matches!(
            transport.send("u@example.com", "hi").await,
            Err(TransportError::Request(_))
        ));
    }
}
