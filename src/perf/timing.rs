use std::future::Future;

use tokio::time::Instant;

use super::recorder::{PerformanceRecorder, Tags};

/// Await `operation`, recording its wall-clock duration in milliseconds.
///
/// Success is recorded as `metric_name`, failure as `{metric_name}_error`.
/// The result is returned untouched.
pub async fn with_timing<T, E, F, Fut>(
    recorder: &PerformanceRecorder,
    metric_name: &str,
    tags: Tags,
    operation: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_at = Instant::now();
    let result = operation().await;
    let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;

    match &result {
        Ok(_) => recorder.record(metric_name, elapsed_ms, tags),
        Err(_) => recorder.record(format!("{metric_name}_error"), elapsed_ms, tags),
    }

    result
}
