//! Bounded usage-history ring and derived statistics.

use crate::budget::types::{TokenUsageRecord, UsageStats};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// An input this many times larger than the output marks a call as having
/// carried more context than the model used.
const WASTE_INPUT_OUTPUT_RATIO: u64 = 8;
/// Calls with less input than this are never counted as wasteful.
const WASTE_MIN_INPUT_TOKENS: u64 = 2000;

/// Most-recent-N ring of usage records. Statistics only, not billing.
#[derive(Debug)]
pub struct UsageHistory {
    records: VecDeque<TokenUsageRecord>,
    capacity: usize,
}

impl UsageHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, record: TokenUsageRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Statistics over the retained records, optionally restricted to
    /// records at or after `since`.
    pub fn stats(&self, since: Option<DateTime<Utc>>) -> UsageStats {
        let records = self
            .records
            .iter()
            .filter(|record| since.is_none_or(|cutoff| record.timestamp >= cutoff));

        let mut stats = UsageStats::default();
        let mut wasted = 0u64;
        for record in records {
            stats.requests += 1;
            stats.input_tokens += record.input_tokens;
            stats.output_tokens += record.output_tokens;
            stats.total_cost += record.cost;

            if record.input_tokens >= WASTE_MIN_INPUT_TOKENS
                && record.input_tokens > record.output_tokens * WASTE_INPUT_OUTPUT_RATIO
            {
                wasted += record.input_tokens - record.output_tokens * WASTE_INPUT_OUTPUT_RATIO;
            }
        }

        if stats.requests > 0 {
            stats.avg_tokens_per_request =
                (stats.input_tokens + stats.output_tokens) as f64 / stats.requests as f64;
        }
        if stats.input_tokens > 0 {
            stats.efficiency_ratio = stats.output_tokens as f64 / stats.input_tokens as f64;
        }
        stats.wasted_input_tokens = wasted;
        stats
    }
}
