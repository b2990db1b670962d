use crate::budget::estimator;
use crate::budget::types::{
    BudgetConfig, Message, ModelProfile, OptimizationReport, TokenUsageRecord, UsageStats,
};
use crate::budget::usage::UsageHistory;
use crate::metrics::{Metric, MetricUnit, MetricsRecorder};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tokio::sync::Mutex;
use tracing::debug;

static SPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static TRAILING_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").expect("valid regex"));

/// Filler phrases removed (or shortened) by the lossy compression pass.
/// Replacements are fixed strings, keeping the pass deterministic.
static FILLER_PHRASES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)please note that\s+", ""),
        (r"(?i)it (?:is|'s) worth noting that\s+", ""),
        (r"(?i)it should be noted that\s+", ""),
        (r"(?i)as (?:mentioned|noted) (?:earlier|above|previously),?\s+", ""),
        (r"(?i)\bin order to\b", "to"),
        (r"(?i)\bdue to the fact that\b", "because"),
        (r"(?i)\bat this point in time\b", "now"),
        (r"(?i)\bbasically,?\s+", ""),
        (r"(?i)\bessentially,?\s+", ""),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("valid regex"), replacement))
    .collect()
});

/// Estimates and optimizes token usage against model capability profiles
/// and tracks per-call cost in a bounded history.
pub struct TokenBudgetManager {
    config: BudgetConfig,
    metrics: Arc<dyn MetricsRecorder>,
    history: Mutex<UsageHistory>,
}

impl TokenBudgetManager {
    pub fn new(config: BudgetConfig, metrics: Arc<dyn MetricsRecorder>) -> Self {
        let history = Mutex::new(UsageHistory::new(config.history_capacity));
        Self {
            config,
            metrics,
            history,
        }
    }

    pub fn estimate_tokens(&self, text: &str, profile: &ModelProfile) -> u64 {
        estimator::estimate_tokens(text, profile)
    }

    pub fn estimate_request_tokens(
        &self,
        messages: &[Message],
        system_prompt: &str,
        profile: &ModelProfile,
    ) -> u64 {
        estimator::estimate_request_tokens(messages, system_prompt, profile)
    }

    /// Fit a request into `context_window - reserved_output_tokens`.
    ///
    /// A request already inside the budget is returned unchanged with an
    /// empty optimization list. Otherwise deterministic text compression
    /// runs first; if the projection still exceeds the target, whole
    /// messages are dropped oldest-first, always retaining the most recent
    /// message.
    pub fn optimize(
        &self,
        messages: &[Message],
        system_prompt: &str,
        profile: &ModelProfile,
        reserved_output_tokens: u64,
    ) -> (Vec<Message>, String, OptimizationReport) {
        let target = profile
            .context_window
            .saturating_sub(reserved_output_tokens)
            .max(1);
        let original_tokens =
            estimator::estimate_request_tokens(messages, system_prompt, profile);

        if original_tokens <= target {
            return (
                messages.to_vec(),
                system_prompt.to_string(),
                OptimizationReport::unchanged(original_tokens),
            );
        }

        let mut optimizations = Vec::new();

        // Pass 1: lossy, deterministic text compression.
        let compressed_system = compress_text(system_prompt);
        let mut compressed: Vec<Message> = messages
            .iter()
            .map(|message| Message {
                role: message.role,
                content: compress_text(&message.content),
            })
            .collect();
        let changed = compressed_system != system_prompt
            || compressed
                .iter()
                .zip(messages)
                .any(|(a, b)| a.content != b.content);
        if changed {
            optimizations.push("text_compression".to_string());
        }
        let system = compressed_system;

        let mut current = estimator::estimate_request_tokens(&compressed, &system, profile);

        // Pass 2: drop whole messages, oldest first, never the final one.
        let mut dropped = 0usize;
        while compressed.len() > 1 && current > target {
            compressed.remove(0);
            dropped += 1;
            current = estimator::estimate_request_tokens(&compressed, &system, profile);
        }
        if dropped > 0 {
            optimizations.push("history_truncation".to_string());
            debug!(dropped, remaining = compressed.len(), "truncated message history");
        }

        let optimized_tokens = current.min(original_tokens);
        let tokens_saved = original_tokens - optimized_tokens;
        let report = OptimizationReport {
            original_tokens,
            optimized_tokens,
            tokens_saved,
            compression_ratio: optimized_tokens as f64 / original_tokens.max(1) as f64,
            optimizations,
            estimated_cost_savings: profile.cost(tokens_saved, 0),
        };

        self.metrics.record_metric(
            Metric::new("budget.tokens_saved", tokens_saved as f64, MetricUnit::Count)
                .with_tag("model", profile.name.clone()),
        );

        (compressed, system, report)
    }

    pub async fn record_usage(&self, record: TokenUsageRecord) {
        self.metrics.record_metric(
            Metric::new(
                "budget.call_tokens",
                (record.input_tokens + record.output_tokens) as f64,
                MetricUnit::Count,
            )
            .with_tag("provider", record.provider.clone())
            .with_tag("model", record.model.clone()),
        );
        self.history.lock().await.push(record);
    }

    /// Statistics over the retained records, optionally restricted to
    /// records at or after `since`.
    pub async fn usage_stats(&self, since: Option<DateTime<Utc>>) -> UsageStats {
        self.history.lock().await.stats(since)
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    /// Drop all retained usage records. Idempotent.
    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }
}

/// Lossy, deterministic text compression: whitespace collapsing and
/// filler-phrase removal. Applied only to requests already over budget.
pub fn compress_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut out = SPACE_RUNS.replace_all(text, " ").into_owned();
    out = TRAILING_SPACE.replace_all(&out, "\n").into_owned();
    out = BLANK_RUNS.replace_all(&out, "\n\n").into_owned();
    for (pattern, replacement) in FILLER_PHRASES.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out.trim().to_string()
}
