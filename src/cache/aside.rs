use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use crate::perf::{PerformanceRecorder, tags};

use super::expiring::ExpiringCache;

pub const METRIC_CACHE_HIT: &str = "cache_hit";
pub const METRIC_CACHE_MISS: &str = "cache_miss";
pub const METRIC_CACHE_ERROR: &str = "cache_error";

/// Cache-aside lookup: return the cached value for `key`, or await
/// `operation` and store its successful result for `ttl`.
///
/// Errors are recorded and returned unchanged; nothing is cached for them.
/// Concurrent misses on the same key each run `operation`; the check and the
/// store are separated by an await and are not deduplicated.
pub async fn with_cache<K, V, E, F, Fut>(
    cache: &ExpiringCache<K, V>,
    key: K,
    ttl: Duration,
    recorder: &PerformanceRecorder,
    operation: F,
) -> Result<V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    let metric_tags = tags([("cache", cache.name())]);

    if let Some(value) = cache.get(&key) {
        recorder.record(METRIC_CACHE_HIT, 1.0, metric_tags);
        return Ok(value);
    }

    match operation().await {
        Ok(value) => {
            cache.set(key, value.clone(), ttl);
            recorder.record(METRIC_CACHE_MISS, 1.0, metric_tags);
            Ok(value)
        }
        Err(error) => {
            recorder.record(METRIC_CACHE_ERROR, 1.0, metric_tags);
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::advance;

    use super::*;
    use crate::cache::CacheConfig;

    const WINDOW: Duration = Duration::from_secs(60);

    fn fixtures() -> (ExpiringCache<String, String>, PerformanceRecorder) {
        (
            ExpiringCache::new("aside", CacheConfig::default()),
            PerformanceRecorder::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_is_served_from_cache() {
        let (cache, recorder) = fixtures();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Result<String, ()> =
                with_cache(&cache, "k".to_string(), WINDOW, &recorder, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("computed".to_string())
                })
                .await;
            assert_eq!(value, Ok("computed".to_string()));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.metrics(Some(METRIC_CACHE_MISS), WINDOW).len(), 1);
        assert_eq!(recorder.metrics(Some(METRIC_CACHE_HIT), WINDOW).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_value_is_recomputed() {
        let cache: ExpiringCache<String, usize> =
            ExpiringCache::new("counts", CacheConfig::default());
        let recorder = PerformanceRecorder::default();
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(1);

        let compute = || async { Ok::<_, ()>(calls.fetch_add(1, Ordering::SeqCst) + 1) };

        assert_eq!(
            with_cache(&cache, "k".to_string(), ttl, &recorder, compute).await,
            Ok(1)
        );
        advance(Duration::from_millis(1001)).await;
        assert_eq!(
            with_cache(&cache, "k".to_string(), ttl, &recorder, compute).await,
            Ok(2)
        );
        assert_eq!(recorder.metrics(Some(METRIC_CACHE_MISS), WINDOW).len(), 2);
    }

    #[tokio::test]
    async fn failure_is_not_cached_and_propagates_unchanged() {
        let (cache, recorder) = fixtures();

        let result: Result<String, &str> =
            with_cache(&cache, "k".to_string(), WINDOW, &recorder, || async {
                Err("analysis unavailable")
            })
            .await;

        assert_eq!(result, Err("analysis unavailable"));
        assert!(!cache.has(&"k".to_string()));
        assert_eq!(recorder.metrics(Some(METRIC_CACHE_ERROR), WINDOW).len(), 1);

        let retried: Result<String, &str> =
            with_cache(&cache, "k".to_string(), WINDOW, &recorder, || async {
                Ok("recovered".to_string())
            })
            .await;
        assert_eq!(retried, Ok("recovered".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_may_both_compute() {
        let (cache, recorder) = fixtures();
        let calls = AtomicUsize::new(0);

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, ()>("v".to_string())
        };

        let (first, second) = tokio::join!(
            with_cache(&cache, "k".to_string(), WINDOW, &recorder, compute),
            with_cache(&cache, "k".to_string(), WINDOW, &recorder, compute),
        );

        assert_eq!(first, Ok("v".to_string()));
        assert_eq!(second, Ok("v".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
