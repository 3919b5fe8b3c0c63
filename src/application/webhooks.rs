use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::dispatch::{Dispatcher, Priority, RequestQueue};
use crate::domain::WebhookDelivery;

use super::error::AppError;

/// Fire-and-forget webhook fan-out through the webhook queue.
pub struct WebhookNotifier<D>
where
    D: Dispatcher<Payload = WebhookDelivery, Output = ()>,
{
    queue: Arc<RequestQueue<D>>,
}

impl<D> WebhookNotifier<D>
where
    D: Dispatcher<Payload = WebhookDelivery, Output = ()>,
{
    pub fn new(queue: Arc<RequestQueue<D>>) -> Self {
        Self { queue }
    }

    /// Queue a delivery and return its id without waiting for the call.
    ///
    /// Failures surface only through queue events, logs and metrics.
    pub fn notify(&self, url: &str, event: &str, payload: Value) -> Result<Uuid, AppError> {
        let url = parse_webhook_url(url)?;
        let event = validate_event(event)?;
        Ok(self.enqueue(url, event, payload))
    }

    /// Same as [`notify`](Self::notify) for several endpoints at once.
    ///
    /// Nothing is queued unless every url is valid.
    pub fn broadcast(
        &self,
        urls: &[&str],
        event: &str,
        payload: &Value,
    ) -> Result<Vec<Uuid>, AppError> {
        let event = validate_event(event)?;
        let urls = urls
            .iter()
            .map(|url| parse_webhook_url(url))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(urls
            .into_iter()
            .map(|url| self.enqueue(url, event, payload.clone()))
            .collect())
    }

    fn enqueue(&self, url: Url, event: &str, payload: Value) -> Uuid {
        let delivery = WebhookDelivery::new(url, event, payload);
        let delivery_id = delivery.id;
        let queued = self.queue.add(delivery, Priority::Medium);
        info!(
            delivery_id = %delivery_id,
            request_id = %queued,
            event,
            "Webhook delivery queued"
        );
        delivery_id
    }
}

fn parse_webhook_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw)
        .map_err(|err| AppError::validation(format!("invalid webhook url `{raw}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::validation(format!(
            "webhook url must be http or https, got `{}`",
            url.scheme()
        )));
    }
    Ok(url)
}

fn validate_event(event: &str) -> Result<&str, AppError> {
    let event = event.trim();
    if event.is_empty() {
        return Err(AppError::validation("webhook event must not be empty"));
    }
    Ok(event)
}
