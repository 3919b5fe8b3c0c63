use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

/// A webhook notification waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub url: Url,
    pub event: String,
    pub payload: Value,
    pub created_at: OffsetDateTime,
}

impl WebhookDelivery {
    pub fn new(url: Url, event: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            event: event.into(),
            payload,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Body posted to the endpoint. The id is stable across retries so
    /// receivers can deduplicate.
    pub fn envelope(&self) -> WebhookEnvelope<'_> {
        WebhookEnvelope {
            id: self.id,
            event: &self.event,
            created_at: self.created_at,
            payload: &self.payload,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookEnvelope<'a> {
    pub id: Uuid,
    pub event: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub payload: &'a Value,
}
