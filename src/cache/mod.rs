//! Courier cache layer.
//!
//! - [`ExpiringCache`]: per-entry TTL store with hit counting, a background
//!   sweeper and an LRU capacity bound.
//! - [`with_cache`]: cache-aside wrapper recording hit/miss/error metrics.
//!
//! One cache instance exists per logical purpose (analysis results, sheet
//! metadata), built in the composition root and shared through `Arc`.
//!
//! ```toml
//! [cache]
//! max_entries = 1000
//! sweep_interval_ms = 60000
//! analysis_ttl_secs = 86400
//! metadata_ttl_secs = 300
//! ```

mod aside;
mod config;
mod expiring;

pub use aside::{METRIC_CACHE_ERROR, METRIC_CACHE_HIT, METRIC_CACHE_MISS, with_cache};
pub use config::CacheConfig;
pub use expiring::{CacheStats, ExpiringCache};
