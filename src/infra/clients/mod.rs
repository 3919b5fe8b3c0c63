//! reqwest clients for the external collaborators.
//!
//! Each client implements [`Dispatcher`](crate::dispatch::Dispatcher) so the
//! matching queue can drive it. Timeouts are owned by the queue; the clients
//! only bound connection setup.

mod analysis;
mod sheets;
mod webhook;

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::dispatch::DispatchError;
use crate::infra::error::InfraError;

pub use analysis::AnalysisClient;
pub use sheets::SheetsClient;
pub use webhook::WebhookClient;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY: usize = 512;

pub fn user_agent() -> &'static str {
    concat!("courier/", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn build_http_client() -> Result<Client, InfraError> {
    Client::builder()
        .user_agent(user_agent())
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|error| InfraError::http_client(error.to_string()))
}

/// Service base URL with a guaranteed trailing slash, so joins append.
pub(crate) fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

/// Rate limiting and server-side failures are worth retrying.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> DispatchError {
    let mut snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    if snippet.len() < body.len() {
        snippet.push('…');
    }
    let message = format!("status {status} body {snippet}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        DispatchError::Transient(message)
    } else {
        DispatchError::Permanent(message)
    }
}

pub(crate) fn classify_transport(error: reqwest::Error) -> DispatchError {
    if error.is_builder() || error.is_decode() {
        DispatchError::Permanent(error.to_string())
    } else {
        DispatchError::Transient(error.to_string())
    }
}

/// Fail on non-success, otherwise discard the body.
pub(crate) async fn expect_success(response: Response) -> Result<(), DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, DispatchError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(classify_transport)?;
    if !status.is_success() {
        return Err(classify_status(status, &String::from_utf8_lossy(&bytes)));
    }
    serde_json::from_slice(&bytes)
        .map_err(|error| DispatchError::Permanent(format!("failed to parse body: {error}")))
}
