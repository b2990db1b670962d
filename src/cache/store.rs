use crate::cache::types::{CacheConfig, CacheEntry, CacheStats, CachedResponse};
use crate::metrics::{Metric, MetricUnit, MetricsRecorder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Bounded response cache with per-entry TTL and strict LRU eviction.
///
/// Expired entries are treated as misses on `get` even before the sweep in
/// `set` removes them. All operations are infallible: callers observe at
/// worst a cache miss, never an error.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    metrics: Arc<dyn MetricsRecorder>,
    state: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    access_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    insertions: u64,
    rejections: u64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            config,
            metrics,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Look up a fingerprint. Expired entries count as misses and are
    /// removed in place; hits refresh recency and the hit counter.
    pub async fn get(&self, fingerprint: &str) -> Option<CachedResponse> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let expired = match state.entries.get(fingerprint) {
            Some(entry) => now >= entry.expires_at,
            None => {
                state.misses += 1;
                self.emit_lookup(false);
                return None;
            }
        };

        if expired {
            if let Some(entry) = state.entries.remove(fingerprint) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                state.expirations += 1;
            }
            state.misses += 1;
            self.emit_lookup(false);
            return None;
        }

        state.access_seq += 1;
        let seq = state.access_seq;
        let entry = state.entries.get_mut(fingerprint)?;
        entry.hit_count += 1;
        entry.last_accessed_at = now;
        entry.access_seq = seq;
        let value = entry.value.clone();
        state.hits += 1;
        self.emit_lookup(true);
        Some(value)
    }

    /// Insert a response under `fingerprint`.
    ///
    /// Sweeps expired entries first, rejects oversized values as a no-op,
    /// then evicts in strict LRU order until the count and byte bounds hold.
    pub async fn set(&self, fingerprint: &str, value: CachedResponse, ttl: Option<Duration>) {
        let size = value.size_bytes();
        let now = Instant::now();
        let mut state = self.state.lock().await;

        Self::sweep_expired(&mut state, now);

        if size > self.config.max_entry_bytes || size > self.config.max_total_bytes {
            state.rejections += 1;
            debug!(fingerprint, size, "cache entry exceeds max_entry_bytes, rejected");
            self.metrics
                .record_metric(Metric::new("cache.rejected", 1.0, MetricUnit::Count));
            return;
        }

        // Replacing an existing key releases its budget before bounds are checked.
        if let Some(old) = state.entries.remove(fingerprint) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
        }

        while !state.entries.is_empty()
            && (state.entries.len() >= self.config.max_entries
                || state.total_bytes + size > self.config.max_total_bytes)
        {
            Self::evict_lru(&mut state);
        }

        let ttl = ttl.unwrap_or(self.config.default_ttl);
        state.access_seq += 1;
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now + ttl,
            hit_count: 0,
            last_accessed_at: now,
            size_bytes: size,
            access_seq: state.access_seq,
        };
        state.total_bytes += size;
        state.entries.insert(fingerprint.to_string(), entry);
        state.insertions += 1;

        self.metrics.record_metric(
            Metric::new("cache.size", state.total_bytes as f64, MetricUnit::Bytes)
                .with_tag("entries", state.entries.len().to_string()),
        );
    }

    /// Remove every entry matching `predicate`. Returns how many were removed.
    pub async fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str, &CachedResponse) -> bool,
    {
        let mut state = self.state.lock().await;
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| predicate(key, &entry.value))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            if let Some(entry) = state.entries.remove(key) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
            }
        }
        if !doomed.is_empty() {
            debug!(count = doomed.len(), "cache entries invalidated");
        }
        doomed.len()
    }

    /// Drop every cached response for one provider.
    pub async fn invalidate_provider(&self, provider: &str) -> usize {
        self.invalidate(|_, value| value.provider == provider).await
    }

    /// Remove all entries. Counters survive; idempotent.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.total_bytes = 0;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let lookups = state.hits + state.misses;
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups > 0 {
                state.hits as f64 / lookups as f64
            } else {
                0.0
            },
            evictions: state.evictions,
            expirations: state.expirations,
            insertions: state.insertions,
            rejections: state.rejections,
        }
    }

    fn sweep_expired(state: &mut CacheState, now: Instant) {
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            if let Some(entry) = state.entries.remove(&key) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                state.expirations += 1;
            }
        }
    }

    fn evict_lru(state: &mut CacheState) {
        let victim = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_seq)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                if let Some(entry) = state.entries.remove(&key) {
                    state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                    state.evictions += 1;
                    debug!(fingerprint = %key, "evicted least-recently-used cache entry");
                }
            }
            None => warn!("eviction requested on an empty cache"),
        }
    }

    fn emit_lookup(&self, hit: bool) {
        self.metrics.record_metric(
            Metric::new("cache.lookup", 1.0, MetricUnit::Count)
                .with_tag("outcome", if hit { "hit" } else { "miss" }),
        );
    }
}
