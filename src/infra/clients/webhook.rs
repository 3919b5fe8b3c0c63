use async_trait::async_trait;
use reqwest::Client;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::domain::WebhookDelivery;
use crate::infra::error::InfraError;

use super::{build_http_client, classify_transport, expect_success};

const EVENT_HEADER: &str = "x-courier-event";
const DELIVERY_HEADER: &str = "x-courier-delivery";

/// Posts webhook envelopes to their delivery URL.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new() -> Result<Self, InfraError> {
        Ok(Self {
            client: build_http_client()?,
        })
    }

    pub async fn deliver(&self, delivery: &WebhookDelivery) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(delivery.url.clone())
            .header(EVENT_HEADER, &delivery.event)
            .header(DELIVERY_HEADER, delivery.id.to_string())
            .json(&delivery.envelope())
            .send()
            .await
            .map_err(classify_transport)?;
        expect_success(response).await
    }
}

#[async_trait]
impl Dispatcher for WebhookClient {
    type Payload = WebhookDelivery;
    type Output = ();

    async fn dispatch(&self, delivery: &WebhookDelivery) -> Result<(), DispatchError> {
        self.deliver(delivery).await
    }
}
