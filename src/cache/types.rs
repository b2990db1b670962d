use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed bookkeeping cost charged per entry on top of its content bytes.
pub(crate) const ENTRY_OVERHEAD_BYTES: u64 = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live entries.
    pub max_entries: usize,
    /// Maximum cumulative size of all live entries.
    pub max_total_bytes: u64,
    /// Entries larger than this are rejected outright.
    pub max_entry_bytes: u64,
    /// TTL applied when `set` is called without an explicit one.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            max_total_bytes: 10 * 1024 * 1024, // 10 MiB
            max_entry_bytes: 1024 * 1024,      // 1 MiB
            default_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// The cached remote response, keyed by request fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CachedResponse {
    /// Size charged against the cache's byte budget.
    pub fn size_bytes(&self) -> u64 {
        self.content.len() as u64
            + self.provider.len() as u64
            + self.model.len() as u64
            + ENTRY_OVERHEAD_BYTES
    }
}

/// A live cache slot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedResponse,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub hit_count: u64,
    pub last_accessed_at: Instant,
    pub size_bytes: u64,
    /// Monotone recency stamp; the smallest stamp is the LRU victim.
    pub(crate) access_seq: u64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub insertions: u64,
    pub rejections: u64,
}
