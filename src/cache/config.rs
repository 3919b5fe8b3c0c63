//! Cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_MAX_ENTRIES: usize = 1_000;
const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-cache settings: capacity, default TTL and sweep cadence.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries before least-recently-used eviction.
    pub max_entries: usize,
    /// TTL applied by callers that do not pick their own.
    pub default_ttl: Duration,
    /// Interval between background sweeps of stale entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CacheConfig {
    /// Analysis results: long-lived, one entry per distinct input text.
    pub fn analysis(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_entries: settings.max_entries.get(),
            default_ttl: settings.analysis_ttl,
            sweep_interval: settings.sweep_interval,
        }
    }

    /// Read-through spreadsheet metadata: short-lived.
    pub fn metadata(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_entries: settings.max_entries.get(),
            default_ttl: settings.metadata_ttl,
            sweep_interval: settings.sweep_interval,
        }
    }

    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
