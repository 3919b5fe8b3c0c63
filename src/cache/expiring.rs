//! Expiring key/value store.
//!
//! Every entry carries its own TTL. Reads past the TTL are misses and evict
//! the entry; a background sweeper bounds memory independently of reads, and
//! a least-recently-used bound caps the entry count.

use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::util::lock::mutex_lock;

use super::config::CacheConfig;

const SOURCE: &str = "cache::expiring";
const METRIC_CACHE_HIT: &str = "courier_cache_hit_total";
const METRIC_CACHE_MISS: &str = "courier_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "courier_cache_evict_total";

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
    hit_count: u64,
}

impl<V> CacheEntry<V> {
    fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// Point-in-time view of a cache, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub size: usize,
    pub capacity: usize,
    pub total_hits: u64,
    pub average_hits: f64,
    pub oldest_entry_age_ms: Option<u64>,
}

/// Generic TTL cache shared by every producer of one logical purpose.
pub struct ExpiringCache<K, V> {
    name: &'static str,
    config: CacheConfig,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            entries: Mutex::new(LruCache::new(config.max_entries_non_zero())),
            config,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `value`, replacing any previous entry and resetting its hit count.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "set");

        // Prefer dropping stale entries over evicting a live one.
        if !entries.contains(&key) && entries.len() >= entries.cap().get() {
            evict_stale(&mut entries, now);
        }

        let entry = CacheEntry {
            value,
            stored_at: now,
            ttl,
            hit_count: 0,
        };
        if let Some((evicted_key, _)) = entries.push(key.clone(), entry) {
            if evicted_key != key {
                counter!(METRIC_CACHE_EVICT, "cache" => self.name, "reason" => "capacity")
                    .increment(1);
            }
        }
    }

    /// Return a fresh value and count the hit; stale entries are evicted.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");

        match entries.get_mut(key) {
            None => {
                counter!(METRIC_CACHE_MISS, "cache" => self.name).increment(1);
                return None;
            }
            Some(entry) if !entry.is_stale(now) => {
                entry.hit_count = entry.hit_count.saturating_add(1);
                counter!(METRIC_CACHE_HIT, "cache" => self.name).increment(1);
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        entries.pop(key);
        counter!(METRIC_CACHE_EVICT, "cache" => self.name, "reason" => "expired").increment(1);
        counter!(METRIC_CACHE_MISS, "cache" => self.name).increment(1);
        None
    }

    /// Freshness check without counting a hit or touching recency.
    pub fn has(&self, key: &K) -> bool {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "has");

        match entries.peek(key).map(|entry| entry.is_stale(now)) {
            Some(false) => true,
            Some(true) => {
                entries.pop(key);
                counter!(METRIC_CACHE_EVICT, "cache" => self.name, "reason" => "expired")
                    .increment(1);
                false
            }
            None => false,
        }
    }

    /// Hit count of a fresh entry.
    pub fn hits(&self, key: &K) -> Option<u64> {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "hits")
            .peek(key)
            .filter(|entry| !entry.is_stale(now))
            .map(|entry| entry.hit_count)
    }

    pub fn delete(&self, key: &K) -> bool {
        mutex_lock(&self.entries, SOURCE, "delete")
            .pop(key)
            .is_some()
    }

    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }

    /// Number of stored entries, stale or not.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every stale entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "sweep");
        let evicted = evict_stale(&mut entries, now);
        if evicted > 0 {
            counter!(METRIC_CACHE_EVICT, "cache" => self.name, "reason" => "expired")
                .increment(evicted as u64);
        }
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = mutex_lock(&self.entries, SOURCE, "stats");

        let size = entries.len();
        let total_hits: u64 = entries.iter().map(|(_, entry)| entry.hit_count).sum();
        let average_hits = if size == 0 {
            0.0
        } else {
            total_hits as f64 / size as f64
        };
        let oldest_entry_age_ms = entries
            .iter()
            .map(|(_, entry)| now.saturating_duration_since(entry.stored_at))
            .max()
            .map(|age| age.as_millis() as u64);

        CacheStats {
            name: self.name,
            size,
            capacity: entries.cap().get(),
            total_hits,
            average_hits,
            oldest_entry_age_ms,
        }
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Run [`sweep`](Self::sweep) every `sweep_interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let interval = self.config.sweep_interval.max(Duration::from_millis(1));
        let name = self.name;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!(cache = name, "Cache dropped, sweeper exiting");
                    break;
                };
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!(cache = name, evicted, "Swept stale cache entries");
                }
            }
        })
    }
}

fn evict_stale<K, V>(entries: &mut LruCache<K, CacheEntry<V>>, now: Instant) -> usize
where
    K: Hash + Eq + Clone,
{
    let stale: Vec<K> = entries
        .iter()
        .filter(|(_, entry)| entry.is_stale(now))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &stale {
        entries.pop(key);
    }
    stale.len()
}
