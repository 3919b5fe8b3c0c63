//! Count-bounded metric stream.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{Label, histogram};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "perf::recorder";
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_SUMMARY_WINDOW: Duration = Duration::from_secs(300);

/// Metric tags, ordered so that summaries and labels are stable.
pub type Tags = BTreeMap<String, String>;

/// Build [`Tags`] from string pairs.
pub fn tags<const N: usize>(pairs: [(&str, &str); N]) -> Tags {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// A single recorded measurement.
#[derive(Debug, Clone)]
pub struct PerformanceMetric {
    pub name: String,
    pub value: f64,
    /// Wall-clock time, for reporting.
    pub timestamp: OffsetDateTime,
    /// Monotonic time, for window queries.
    pub recorded_at: Instant,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Retention bound; the oldest metrics are dropped beyond it.
    pub max_entries: usize,
    /// Trailing window used by health summaries.
    pub summary_window: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            summary_window: DEFAULT_SUMMARY_WINDOW,
        }
    }
}

impl From<&crate::config::RecorderSettings> for RecorderConfig {
    fn from(settings: &crate::config::RecorderSettings) -> Self {
        Self {
            max_entries: settings.max_entries.get(),
            summary_window: settings.summary_window,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecorderStats {
    /// Metrics currently retained.
    pub retained: usize,
    /// Metrics recorded since startup, including pruned ones.
    pub total_recorded: u64,
    pub unique_names: usize,
    pub oldest_age_ms: Option<u64>,
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub count: usize,
    pub average: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Append-only metric stream shared by every orchestration component.
///
/// `record` is called from success and failure paths alike, so it never
/// panics and never returns an error.
pub struct PerformanceRecorder {
    config: RecorderConfig,
    entries: Mutex<VecDeque<PerformanceMetric>>,
    total_recorded: AtomicU64,
}

impl PerformanceRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(config.max_entries.min(1024))),
            config,
            total_recorded: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Append a metric, pruning the oldest entries beyond the retention count.
    pub fn record(&self, name: impl Into<String>, value: f64, tags: Tags) {
        let name = name.into();

        let labels: Vec<Label> = tags
            .iter()
            .map(|(key, value)| Label::new(key.clone(), value.clone()))
            .collect();
        histogram!(format!("courier_{name}"), labels).record(value);

        let metric = PerformanceMetric {
            name,
            value,
            timestamp: OffsetDateTime::now_utc(),
            recorded_at: Instant::now(),
            tags,
        };

        let mut entries = mutex_lock(&self.entries, SOURCE, "record");
        entries.push_back(metric);
        while entries.len() > self.config.max_entries {
            entries.pop_front();
        }
        self.total_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Metrics recorded within the trailing `window`, optionally filtered by name.
    pub fn metrics(&self, name: Option<&str>, window: Duration) -> Vec<PerformanceMetric> {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "metrics")
            .iter()
            .filter(|metric| now.saturating_duration_since(metric.recorded_at) <= window)
            .filter(|metric| name.is_none_or(|name| metric.name == name))
            .cloned()
            .collect()
    }

    /// Mean value over the window, or `None` when nothing matched.
    pub fn average(&self, name: Option<&str>, window: Duration) -> Option<f64> {
        let values = self.values(name, window);
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Nearest-rank percentile over the window (`p` in `0..=100`).
    pub fn percentile(&self, name: Option<&str>, p: f64, window: Duration) -> Option<f64> {
        let mut values = self.values(name, window);
        values.sort_by(f64::total_cmp);
        nearest_rank(&values, p)
    }

    /// Count, mean and tail percentiles for one metric name.
    pub fn summary(&self, name: &str, window: Duration) -> Option<MetricSummary> {
        let mut values = self.values(Some(name), window);
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let count = values.len();
        let average = values.iter().sum::<f64>() / count as f64;
        Some(MetricSummary {
            name: name.to_string(),
            count,
            average,
            p50: nearest_rank(&values, 50.0).unwrap_or_default(),
            p95: nearest_rank(&values, 95.0).unwrap_or_default(),
            p99: nearest_rank(&values, 99.0).unwrap_or_default(),
        })
    }

    /// Distinct metric names currently retained, sorted.
    pub fn names(&self) -> Vec<String> {
        let entries = mutex_lock(&self.entries, SOURCE, "names");
        let mut names: Vec<String> = entries
            .iter()
            .map(|metric| metric.name.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> RecorderStats {
        let now = Instant::now();
        let entries = mutex_lock(&self.entries, SOURCE, "stats");
        let unique_names = entries
            .iter()
            .map(|metric| metric.name.as_str())
            .collect::<HashSet<_>>()
            .len();
        let oldest_age_ms = entries.front().map(|metric| {
            now.saturating_duration_since(metric.recorded_at)
                .as_millis() as u64
        });

        RecorderStats {
            retained: entries.len(),
            total_recorded: self.total_recorded.load(Ordering::Relaxed),
            unique_names,
            oldest_age_ms,
            max_entries: self.config.max_entries,
        }
    }

    fn values(&self, name: Option<&str>, window: Duration) -> Vec<f64> {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "values")
            .iter()
            .filter(|metric| now.saturating_duration_since(metric.recorded_at) <= window)
            .filter(|metric| name.is_none_or(|name| metric.name == name))
            .map(|metric| metric.value)
            .collect()
    }
}

impl Default for PerformanceRecorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

/// Value at index `ceil(p/100 * n) - 1` of an ascending slice.
fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use tokio::time::advance;

    use super::*;

    fn recorder(max_entries: usize) -> PerformanceRecorder {
        PerformanceRecorder::new(RecorderConfig {
            max_entries,
            ..Default::default()
        })
    }

    #[test]
    fn retention_is_bounded_by_count() {
        let recorder = recorder(3);
        for value in 1..=5 {
            recorder.record("latency", value as f64, Tags::new());
        }

        let values: Vec<f64> = recorder
            .metrics(None, Duration::from_secs(60))
            .into_iter()
            .map(|metric| metric.value)
            .collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);

        let stats = recorder.stats();
        assert_eq!(stats.retained, 3);
        assert_eq!(stats.total_recorded, 5);
    }

    #[test]
    fn filters_by_name() {
        let recorder = recorder(100);
        recorder.record("a", 1.0, Tags::new());
        recorder.record("b", 2.0, Tags::new());
        recorder.record("a", 3.0, Tags::new());

        let only_a = recorder.metrics(Some("a"), Duration::from_secs(60));
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|metric| metric.name == "a"));
        assert_eq!(recorder.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn window_excludes_older_metrics() {
        let recorder = recorder(100);
        recorder.record("latency", 100.0, Tags::new());
        advance(Duration::from_secs(10)).await;
        recorder.record("latency", 10.0, Tags::new());

        let recent = recorder.metrics(Some("latency"), Duration::from_secs(5));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value, 10.0);
        assert_eq!(
            recorder.average(Some("latency"), Duration::from_secs(60)),
            Some(55.0)
        );
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let recorder = recorder(100);
        for value in [50.0, 10.0, 40.0, 20.0, 30.0] {
            recorder.record("latency", value, Tags::new());
        }
        let window = Duration::from_secs(60);

        // n = 5: p50 -> ceil(2.5) - 1 = 2, p95 -> ceil(4.75) - 1 = 4, p0 -> 0
        assert_eq!(recorder.percentile(Some("latency"), 50.0, window), Some(30.0));
        assert_eq!(recorder.percentile(Some("latency"), 95.0, window), Some(50.0));
        assert_eq!(recorder.percentile(Some("latency"), 0.0, window), Some(10.0));
        assert_eq!(recorder.percentile(Some("missing"), 50.0, window), None);
    }

    #[test]
    fn summary_reports_tail_latencies() {
        let recorder = recorder(1000);
        for value in 1..=100 {
            recorder.record("dispatch", value as f64, tags([("queue", "webhook")]));
        }

        let summary = recorder
            .summary("dispatch", Duration::from_secs(60))
            .expect("summary for recorded metric");
        assert_eq!(summary.count, 100);
        assert_eq!(summary.average, 50.5);
        assert_eq!(summary.p50, 50.0);
        assert_eq!(summary.p95, 95.0);
        assert_eq!(summary.p99, 99.0);
        assert!(recorder.summary("other", Duration::from_secs(60)).is_none());
    }

    #[test]
    fn non_finite_values_do_not_panic() {
        let recorder = recorder(10);
        recorder.record("weird", f64::NAN, Tags::new());
        recorder.record("weird", f64::INFINITY, Tags::new());
        recorder.record("weird", 1.0, Tags::new());

        assert!(
            recorder
                .percentile(Some("weird"), f64::NAN, Duration::from_secs(60))
                .is_some()
        );
    }

    #[test]
    fn record_recovers_from_poisoned_lock() {
        let recorder = recorder(10);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = recorder
                .entries
                .lock()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        recorder.record("after_poison", 1.0, Tags::new());
        assert_eq!(recorder.stats().retained, 1);
    }
}
