//! Renders and sends one notification per subscriber.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::snapshot::{Subscriber, SubscriberSnapshot};
use super::template::{self, RenderError};
use crate::domain::{BusFilter, BusMessage, TemplateId};
use crate::store::{StoreError, TemplateStore};
use crate::transport::{NotificationTransport, TransportError};

/// Why a single delivery failed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The template was missing or malformed.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The template could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The transport failed or timed out.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Renders notifications and hands them to the transport.
///
/// Cloning is cheap; every clone shares the same template store and
/// transport.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    templates: Arc<dyn TemplateStore>,
    transport: Arc<dyn NotificationTransport>,
    send_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher bounding each send by `send_timeout`.
    #[must_use]
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        transport: Arc<dyn NotificationTransport>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            templates,
            transport,
            send_timeout,
        }
    }

    /// Picks the template for a delivery: the subscription's own, else the
    /// filter's default, else none.
    #[must_use]
    pub fn resolve_template(subscriber: &Subscriber, filter: &BusFilter) -> Option<TemplateId> {
        subscriber.template_id.or(filter.template_id)
    }

    /// Produces the body delivered to `subscriber`.
    ///
    /// Without a template the raw message body is returned.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Render`] if the template is missing or
    /// malformed and [`DispatchError::Store`] if it cannot be read.
    pub async fn render(
        &self,
        filter: &BusFilter,
        subscriber: &Subscriber,
        message: &BusMessage,
    ) -> Result<String, DispatchError> {
        let Some(template_id) = Self::resolve_template(subscriber, filter) else {
            return Ok(message.body.clone());
        };
        let template = self
            .templates
            .get_template(template_id)
            .await?
            .ok_or(RenderError::MissingTemplate(template_id))?;

        let context = template::render_context(message, &subscriber.user, filter);
        Ok(template::render(&template.text, &context)?)
    }

    /// Renders and sends one notification.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] if rendering fails, or if the transport
    /// fails or does not answer within the send timeout.
    pub async fn dispatch(
        &self,
        filter: &BusFilter,
        subscriber: &Subscriber,
        message: &BusMessage,
    ) -> Result<(), DispatchError> {
        let body = self.render(filter, subscriber, message).await?;
        let recipient = subscriber.user.email.as_str();
        match tokio::time::timeout(self.send_timeout, self.transport.send(recipient, &body)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout(
                u64::try_from(self.send_timeout.as_millis()).unwrap_or(u64::MAX),
            )
            .into()),
        }
    }

    /// Spawns one delivery task per subscriber of `snapshot`.
    ///
    /// Failures are logged and isolated: one failing subscriber never
    /// affects the others. The returned handles may be dropped; the tasks
    /// run to completion regardless.
    pub fn fan_out(
        &self,
        snapshot: &Arc<SubscriberSnapshot>,
        message: BusMessage,
    ) -> Vec<JoinHandle<Result<(), DispatchError>>> {
        let message = Arc::new(message);
        snapshot
            .subscribers
            .iter()
            .cloned()
            .map(|subscriber| {
                let dispatcher = self.clone();
                let snapshot = Arc::clone(snapshot);
                let message = Arc::clone(&message);
                tokio::spawn(async move {
                    let result = dispatcher
                        .dispatch(&snapshot.filter, &subscriber, &message)
                        .await;
                    match &result {
                        Ok(()) => tracing::debug!(
                            filter_id = %snapshot.filter.id,
                            subscription_id = %subscriber.subscription_id,
                            recipient = %subscriber.user.email,
                            "notification sent"
                        ),
                        Err(e) => tracing::warn!(
                            filter_id = %snapshot.filter.id,
                            subscription_id = %subscriber.subscription_id,
                            recipient = %subscriber.user.email,
                            error = %e,
                            "notification skipped"
                        ),
                    }
                    result
                })
            })
            .collect()
    }
}
