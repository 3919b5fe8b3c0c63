use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::batch::{BatchTicket, BatchedOperation, RequestBatcher, Row, SheetCall};
use crate::cache::{ExpiringCache, with_cache};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::domain::SheetMetadata;
use crate::perf::{PerformanceRecorder, tags, with_timing};

use super::error::AppError;

pub const METRIC_SHEETS_METADATA: &str = "sheets_metadata";

/// Read side of the spreadsheet service.
#[async_trait]
pub trait SheetMetadataSource: Send + Sync {
    async fn fetch_metadata(&self, destination: &str) -> Result<SheetMetadata, DispatchError>;
}

/// Spreadsheet logging: writes are coalesced by the batcher, metadata reads
/// go through a short-lived cache.
pub struct SheetLogger<D>
where
    D: Dispatcher<Payload = SheetCall, Output = ()>,
{
    batcher: Arc<RequestBatcher<D>>,
    metadata_source: Arc<dyn SheetMetadataSource>,
    metadata_cache: Arc<ExpiringCache<String, SheetMetadata>>,
    recorder: Arc<PerformanceRecorder>,
    metadata_ttl: Duration,
}

impl<D> SheetLogger<D>
where
    D: Dispatcher<Payload = SheetCall, Output = ()>,
{
    pub fn new(
        batcher: Arc<RequestBatcher<D>>,
        metadata_source: Arc<dyn SheetMetadataSource>,
        metadata_cache: Arc<ExpiringCache<String, SheetMetadata>>,
        recorder: Arc<PerformanceRecorder>,
    ) -> Self {
        let metadata_ttl = metadata_cache.config().default_ttl;
        Self {
            batcher,
            metadata_source,
            metadata_cache,
            recorder,
            metadata_ttl,
        }
    }

    /// Append rows to `destination`. Await the ticket to learn the outcome
    /// of the flush, or drop it to log detached.
    pub fn log_rows(&self, destination: &str, rows: Vec<Row>) -> Result<BatchTicket, AppError> {
        let destination = validate_destination(destination)?;
        if rows.is_empty() {
            return Err(AppError::validation("at least one row is required"));
        }
        Ok(self
            .batcher
            .queue_operation(BatchedOperation::append(destination, rows)))
    }

    pub fn update_range(
        &self,
        destination: &str,
        range: &str,
        rows: Vec<Row>,
    ) -> Result<BatchTicket, AppError> {
        let destination = validate_destination(destination)?;
        if range.trim().is_empty() {
            return Err(AppError::validation("range must not be empty"));
        }
        // The cached row count is stale once the update lands.
        self.metadata_cache.delete(&destination.to_string());
        Ok(self
            .batcher
            .queue_operation(BatchedOperation::update(destination, range.trim(), rows)))
    }

    pub fn create(&self, destination: &str, rows: Vec<Row>) -> Result<BatchTicket, AppError> {
        let destination = validate_destination(destination)?;
        Ok(self
            .batcher
            .queue_operation(BatchedOperation::create(destination, rows)))
    }

    /// Metadata for `destination`, cached for the metadata TTL.
    pub async fn metadata(&self, destination: &str) -> Result<SheetMetadata, AppError> {
        let destination = validate_destination(destination)?;
        debug!(destination, "Fetching sheet metadata");

        with_cache(
            &self.metadata_cache,
            destination.to_string(),
            self.metadata_ttl,
            &self.recorder,
            || {
                with_timing(
                    &self.recorder,
                    METRIC_SHEETS_METADATA,
                    tags([("destination", destination)]),
                    || async {
                        self.metadata_source
                            .fetch_metadata(destination)
                            .await
                            .map_err(AppError::from)
                    },
                )
            },
        )
        .await
    }
}

fn validate_destination(destination: &str) -> Result<&str, AppError> {
    let destination = destination.trim();
    if destination.is_empty() {
        return Err(AppError::validation("destination must not be empty"));
    }
    if destination.contains('/') {
        return Err(AppError::validation(format!(
            "destination `{destination}` must not contain `/`"
        )));
    }
    Ok(destination)
}
