use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Whether the pipeline routes eligible calls through the scheduler at
    /// all. The scheduler itself ignores this flag.
    pub enabled: bool,
    /// A queue reaching this many items flushes immediately.
    pub max_batch_size: usize,
    /// Smallest batch the opportunistic (low-load / fast-processing)
    /// triggers will flush.
    pub min_batch_size: usize,
    /// Upper bound on how long an item may wait in its queue.
    pub max_wait_time: Duration,
    /// Batches executing concurrently per scheduler.
    pub max_concurrent_batches: usize,
    /// Order queues by descending priority instead of pure FIFO.
    pub priority_queuing: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 5,
            min_batch_size: 2,
            max_wait_time: Duration::from_secs(2),
            max_concurrent_batches: 3,
            priority_queuing: true,
        }
    }
}

/// Depth snapshot of one provider queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDepth {
    pub provider: String,
    pub depth: usize,
    /// Age of the oldest queued item.
    pub oldest_age: Option<Duration>,
}

/// Point-in-time scheduler snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub queues: Vec<QueueDepth>,
    pub active_batches: usize,
    /// Rolling average batch processing time, zero until a batch completes.
    pub avg_processing_time: Duration,
}
