//! Queue configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Settings for one queue instance, fixed per external collaborator.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue label used in logs, metrics and events.
    pub name: &'static str,
    /// Maximum calls in flight at once.
    pub concurrency: NonZeroUsize,
    /// Per-call timeout; expiry counts as a transient failure.
    pub call_timeout: Duration,
    /// Retries after the first attempt before a request is dropped.
    pub max_retries: u32,
    /// Backoff before retry `k` is `backoff_base * 2^k`.
    pub backoff_base: Duration,
}

impl QueueConfig {
    pub fn new(name: &'static str, concurrency: usize, call_timeout: Duration) -> Self {
        Self {
            name,
            concurrency: NonZeroUsize::new(concurrency).unwrap_or(NonZeroUsize::MIN),
            call_timeout,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// AI analysis calls: slow, awaited by the request handler.
    pub fn analysis() -> Self {
        Self::new("analysis", 2, Duration::from_secs(30))
    }

    /// Spreadsheet writes.
    pub fn sheets() -> Self {
        Self::new("sheets", 3, Duration::from_secs(15))
    }

    /// Webhook deliveries.
    pub fn webhook() -> Self {
        Self::new("webhook", 5, Duration::from_secs(10))
    }

    pub fn from_settings(name: &'static str, settings: &crate::config::QueueSettings) -> Self {
        Self {
            name,
            concurrency: settings.concurrency,
            call_timeout: settings.call_timeout,
            max_retries: settings.max_retries,
            backoff_base: settings.backoff_base,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}
