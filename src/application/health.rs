use serde::Serialize;
use time::OffsetDateTime;

use crate::batch::BatcherStats;
use crate::cache::CacheStats;
use crate::dispatch::QueueStats;
use crate::perf::{MetricSummary, RecorderStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// At least one queue is closed and rejecting work.
    Draining,
}

/// Snapshot served on `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub uptime_secs: u64,
    pub caches: Vec<CacheStats>,
    pub queues: Vec<QueueStats>,
    pub batcher: BatcherStats,
    pub recorder: RecorderStats,
    /// One summary per metric name recorded within the summary window.
    pub metrics: Vec<MetricSummary>,
}
