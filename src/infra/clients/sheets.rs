use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::json;
use url::Url;

use crate::application::sheets::SheetMetadataSource;
use crate::batch::SheetCall;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::domain::SheetMetadata;
use crate::infra::error::InfraError;

use super::{build_http_client, classify_transport, expect_success, normalize_base, read_json};

/// Client for the spreadsheet logging service.
///
/// Every call targets `{base}/{destination}/{action}`; a call is applied
/// entirely or not at all by the service.
#[derive(Debug, Clone)]
pub struct SheetsClient {
    client: Client,
    base: Url,
    api_key: Option<String>,
}

impl SheetsClient {
    pub fn new(base: Url, api_key: Option<String>) -> Result<Self, InfraError> {
        Ok(Self {
            client: build_http_client()?,
            base: normalize_base(base),
            api_key,
        })
    }

    fn url(&self, destination: &str, action: &str) -> Result<Url, DispatchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| DispatchError::permanent("sheets base URL cannot be a base"))?
            .pop_if_empty()
            .push(destination)
            .push(action);
        Ok(url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    pub async fn execute(&self, call: &SheetCall) -> Result<(), DispatchError> {
        let (action, body) = match call {
            SheetCall::Append { rows, .. } => ("append", json!({ "rows": rows })),
            SheetCall::BatchUpdate { ranges, .. } => ("batch-update", json!({ "ranges": ranges })),
            SheetCall::Create { rows, .. } => ("create", json!({ "rows": rows })),
        };
        let url = self.url(call.destination(), action)?;
        let response = self
            .authorize(self.client.post(url).json(&body))
            .send()
            .await
            .map_err(classify_transport)?;
        expect_success(response).await
    }

    pub async fn fetch_metadata(&self, destination: &str) -> Result<SheetMetadata, DispatchError> {
        let url = self.url(destination, "metadata")?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(classify_transport)?;
        read_json(response).await
    }
}

#[async_trait]
impl Dispatcher for SheetsClient {
    type Payload = SheetCall;
    type Output = ();

    async fn dispatch(&self, call: &SheetCall) -> Result<(), DispatchError> {
        self.execute(call).await
    }
}

#[async_trait]
impl SheetMetadataSource for SheetsClient {
    async fn fetch_metadata(&self, destination: &str) -> Result<SheetMetadata, DispatchError> {
        SheetsClient::fetch_metadata(self, destination).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;

    use super::*;
    use crate::batch::RangeUpdate;

    fn client(server: &MockServer) -> SheetsClient {
        SheetsClient::new(Url::parse(&server.url("/v1")).expect("url"), None).expect("client")
    }

    #[tokio::test]
    async fn append_posts_all_rows_in_one_call() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/v1/journal/append")
                    .json_body(json!({"rows": [["a", 1], ["b", 2]]}));
                then.status(200);
            })
            .await;

        client(&server)
            .dispatch(&SheetCall::Append {
                destination: "journal".into(),
                rows: vec![vec![json!("a"), json!(1)], vec![json!("b"), json!(2)]],
            })
            .await
            .expect("append");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn batch_update_sends_ranges() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/v1/journal/batch-update")
                    .json_body(json!({"ranges": [{"range": "A1:B1", "values": [["x", "y"]]}]}));
                then.status(204);
            })
            .await;

        client(&server)
            .dispatch(&SheetCall::BatchUpdate {
                destination: "journal".into(),
                ranges: vec![RangeUpdate {
                    range: "A1:B1".into(),
                    values: vec![vec![json!("x"), json!("y")]],
                }],
            })
            .await
            .expect("batch update");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_targets_destination_path() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST").path("/v1/team-notes/create");
                then.status(201);
            })
            .await;

        client(&server)
            .dispatch(&SheetCall::Create {
                destination: "team-notes".into(),
                rows: Vec::new(),
            })
            .await
            .expect("create");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("POST").path("/v1/journal/append");
                then.status(503).body("maintenance");
            })
            .await;

        let error = client(&server)
            .dispatch(&SheetCall::Append {
                destination: "journal".into(),
                rows: vec![vec![json!("a")]],
            })
            .await
            .expect_err("503");
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn fetches_metadata() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/v1/journal/metadata");
                then.status(200).json_body(json!({
                    "destination": "journal",
                    "title": "Journal",
                    "columns": ["date", "entry"],
                    "row_count": 12
                }));
            })
            .await;

        let metadata = client(&server)
            .fetch_metadata("journal")
            .await
            .expect("metadata");
        assert_eq!(metadata.title, "Journal");
        assert_eq!(metadata.row_count, 12);
    }
}
