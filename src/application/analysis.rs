use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::cache::{ExpiringCache, with_cache};
use crate::dispatch::{Dispatcher, Priority, RequestQueue};
use crate::domain::{AnalysisRequest, Categorization};
use crate::perf::{PerformanceRecorder, tags, with_timing};

use super::error::AppError;

pub const METRIC_CATEGORIZE: &str = "categorize";

/// Awaited categorization: cache first, then a high-priority slot on the
/// analysis queue.
pub struct AnalysisService<D>
where
    D: Dispatcher<Payload = AnalysisRequest, Output = Categorization>,
{
    queue: Arc<RequestQueue<D>>,
    cache: Arc<ExpiringCache<String, Categorization>>,
    recorder: Arc<PerformanceRecorder>,
    ttl: Duration,
}

impl<D> AnalysisService<D>
where
    D: Dispatcher<Payload = AnalysisRequest, Output = Categorization>,
{
    pub fn new(
        queue: Arc<RequestQueue<D>>,
        cache: Arc<ExpiringCache<String, Categorization>>,
        recorder: Arc<PerformanceRecorder>,
    ) -> Self {
        let ttl = cache.config().default_ttl;
        Self {
            queue,
            cache,
            recorder,
            ttl,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[instrument(skip_all, fields(text_len = text.len()))]
    pub async fn categorize(&self, text: &str) -> Result<Categorization, AppError> {
        let request = AnalysisRequest::new(text)?;
        let key = request.cache_key();
        debug!(key = %key, "Categorizing text");

        with_cache(&self.cache, key, self.ttl, &self.recorder, || {
            with_timing(
                &self.recorder,
                METRIC_CATEGORIZE,
                tags([("queue", self.queue.name())]),
                || async {
                    self.queue
                        .submit(request, Priority::High)
                        .await
                        .map_err(AppError::from)
                },
            )
        })
        .await
    }
}
