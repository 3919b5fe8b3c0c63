use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::batch::{BatcherConfig, RequestBatcher};
use crate::cache::{CacheConfig, ExpiringCache};
use crate::config::Settings;
use crate::dispatch::{QueueConfig, RequestQueue};
use crate::domain::{Categorization, SheetMetadata};
use crate::infra::clients::{AnalysisClient, SheetsClient, WebhookClient};
use crate::infra::error::InfraError;
use crate::perf::{MetricSummary, PerformanceRecorder, RecorderConfig};

use super::analysis::AnalysisService;
use super::health::{HealthReport, HealthStatus};
use super::sheets::{SheetLogger, SheetMetadataSource};
use super::webhooks::WebhookNotifier;

/// Composition root: owns every cache, queue, batcher and the recorder, and
/// hands out the services built on them.
pub struct Orchestrator {
    started_at: Instant,
    summary_window: Duration,
    recorder: Arc<PerformanceRecorder>,
    analysis_cache: Arc<ExpiringCache<String, Categorization>>,
    metadata_cache: Arc<ExpiringCache<String, SheetMetadata>>,
    analysis_queue: Arc<RequestQueue<AnalysisClient>>,
    sheets_queue: Arc<RequestQueue<SheetsClient>>,
    webhook_queue: Arc<RequestQueue<WebhookClient>>,
    batcher: Arc<RequestBatcher<SheetsClient>>,
    analysis: AnalysisService<AnalysisClient>,
    sheets: SheetLogger<SheetsClient>,
    webhooks: WebhookNotifier<WebhookClient>,
    sweepers: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Wire up every component from settings. Spawns queue supervisors and
    /// cache sweepers, so it must run inside a tokio runtime.
    pub fn build(settings: &Settings) -> Result<Self, InfraError> {
        let recorder = Arc::new(PerformanceRecorder::new(RecorderConfig::from(
            &settings.recorder,
        )));

        let analysis_cache = Arc::new(ExpiringCache::new(
            "analysis",
            CacheConfig::analysis(&settings.cache),
        ));
        let metadata_cache = Arc::new(ExpiringCache::new(
            "sheet_metadata",
            CacheConfig::metadata(&settings.cache),
        ));

        let services = &settings.services;
        let analysis_client =
            AnalysisClient::new(services.analysis_url.clone(), services.analysis_api_key.clone())?;
        let sheets_client =
            SheetsClient::new(services.sheets_url.clone(), services.sheets_api_key.clone())?;
        let webhook_client = WebhookClient::new()?;

        let analysis_queue = Arc::new(RequestQueue::new(
            QueueConfig::from_settings("analysis", &settings.queues.analysis),
            analysis_client,
            Arc::clone(&recorder),
        ));
        let sheets_queue = Arc::new(RequestQueue::new(
            QueueConfig::from_settings("sheets", &settings.queues.sheets),
            sheets_client.clone(),
            Arc::clone(&recorder),
        ));
        let webhook_queue = Arc::new(RequestQueue::new(
            QueueConfig::from_settings("webhook", &settings.queues.webhook),
            webhook_client,
            Arc::clone(&recorder),
        ));

        let batcher = Arc::new(RequestBatcher::new(
            BatcherConfig::from(&settings.batcher),
            Arc::clone(&sheets_queue),
        ));

        let analysis = AnalysisService::new(
            Arc::clone(&analysis_queue),
            Arc::clone(&analysis_cache),
            Arc::clone(&recorder),
        );
        let sheets = SheetLogger::new(
            Arc::clone(&batcher),
            Arc::new(sheets_client) as Arc<dyn SheetMetadataSource>,
            Arc::clone(&metadata_cache),
            Arc::clone(&recorder),
        );
        let webhooks = WebhookNotifier::new(Arc::clone(&webhook_queue));

        let sweepers = vec![
            analysis_cache.spawn_sweeper(),
            metadata_cache.spawn_sweeper(),
        ];

        info!(
            analysis_concurrency = settings.queues.analysis.concurrency.get(),
            sheets_concurrency = settings.queues.sheets.concurrency.get(),
            webhook_concurrency = settings.queues.webhook.concurrency.get(),
            batch_size = settings.batcher.batch_size.get(),
            "Orchestrator ready"
        );

        Ok(Self {
            started_at: Instant::now(),
            summary_window: settings.recorder.summary_window,
            recorder,
            analysis_cache,
            metadata_cache,
            analysis_queue,
            sheets_queue,
            webhook_queue,
            batcher,
            analysis,
            sheets,
            webhooks,
            sweepers,
        })
    }

    pub fn analysis(&self) -> &AnalysisService<AnalysisClient> {
        &self.analysis
    }

    pub fn sheets(&self) -> &SheetLogger<SheetsClient> {
        &self.sheets
    }

    pub fn webhooks(&self) -> &WebhookNotifier<WebhookClient> {
        &self.webhooks
    }

    pub fn recorder(&self) -> &Arc<PerformanceRecorder> {
        &self.recorder
    }

    /// Summary of one metric over the configured window.
    pub fn metric_summary(&self, name: &str) -> Option<MetricSummary> {
        self.recorder.summary(name, self.summary_window)
    }

    pub fn health(&self) -> HealthReport {
        let queues = vec![
            self.analysis_queue.stats(),
            self.sheets_queue.stats(),
            self.webhook_queue.stats(),
        ];
        let draining = self.analysis_queue.is_closed()
            || self.sheets_queue.is_closed()
            || self.webhook_queue.is_closed();

        let metrics = self
            .recorder
            .names()
            .iter()
            .filter_map(|name| self.recorder.summary(name, self.summary_window))
            .collect();

        HealthReport {
            status: if draining {
                HealthStatus::Draining
            } else {
                HealthStatus::Ok
            },
            generated_at: OffsetDateTime::now_utc(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            caches: vec![self.analysis_cache.stats(), self.metadata_cache.stats()],
            queues,
            batcher: self.batcher.stats(),
            recorder: self.recorder.stats(),
            metrics,
        }
    }

    /// Flush open batches, give the queues up to `grace` to drain, then close
    /// them and stop the sweepers. Returns `false` if work was still pending
    /// when the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let flushed = self.batcher.flush_all();
        info!(flushed, grace_ms = grace.as_millis() as u64, "Draining orchestrator");

        let deadline = Instant::now() + grace;
        let mut drained = true;
        drained &= self
            .analysis_queue
            .wait_idle(deadline.saturating_duration_since(Instant::now()))
            .await;
        drained &= self
            .sheets_queue
            .wait_idle(deadline.saturating_duration_since(Instant::now()))
            .await;
        drained &= self
            .webhook_queue
            .wait_idle(deadline.saturating_duration_since(Instant::now()))
            .await;

        if !drained {
            warn!("Grace period elapsed with requests still queued");
        }

        self.analysis_queue.shutdown();
        self.sheets_queue.shutdown();
        self.webhook_queue.shutdown();
        for sweeper in &self.sweepers {
            sweeper.abort();
        }
        drained
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for sweeper in &self.sweepers {
            sweeper.abort();
        }
    }
}
