use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::domain::{AnalysisRequest, Categorization};
use crate::infra::error::InfraError;

use super::{build_http_client, classify_transport, read_json};

/// Posts text to the categorization endpoint.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl AnalysisClient {
    pub fn new(endpoint: Url, api_key: Option<String>) -> Result<Self, InfraError> {
        Ok(Self {
            client: build_http_client()?,
            endpoint,
            api_key,
        })
    }

    pub async fn categorize(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Categorization, DispatchError> {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(classify_transport)?;
        read_json(response).await
    }
}

#[async_trait]
impl Dispatcher for AnalysisClient {
    type Payload = AnalysisRequest;
    type Output = Categorization;

    async fn dispatch(&self, payload: &AnalysisRequest) -> Result<Categorization, DispatchError> {
        self.categorize(payload).await
    }
}
