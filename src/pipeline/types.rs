use crate::batch::BatchConfig;
use crate::budget::{BudgetConfig, Message, TokenUsage};
use crate::cache::CacheConfig;
use crate::context::ChunkerConfig;
use crate::recovery::{BreakerConfig, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call options. Everything here is advisory for the remote backend
/// except `allow_batching`, `priority` and `cache_ttl`, which steer the
/// pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOptions {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u64>,
    /// Whether this call class may be coalesced into batches.
    pub allow_batching: bool,
    /// Queue priority when batched; higher runs earlier.
    pub priority: i32,
    /// Overrides the cache's default TTL for this response.
    pub cache_ttl: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_output_tokens: None,
            allow_batching: true,
            priority: 0,
            cache_ttl: None,
        }
    }
}

/// An inbound request to the pipeline.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub provider: String,
    pub model: String,
    pub options: CallOptions,
    pub signal: Option<CancellationToken>,
}

impl ChatRequest {
    pub fn new(
        messages: Vec<Message>,
        system_prompt: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            messages,
            system_prompt: system_prompt.into(),
            provider: provider.into(),
            model: model.into(),
            options: CallOptions::default(),
            signal: None,
        }
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// How the pipeline handled a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub cache_hit: bool,
    pub optimized: bool,
    pub original_tokens: u64,
    pub final_tokens: u64,
    pub processing_time: Duration,
    pub optimizations: Vec<String>,
}

/// The pipeline's answer to a [`ChatRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub metadata: ResponseMetadata,
}

/// The outbound call handed to the injected executor, after optimization.
#[derive(Debug, Clone)]
pub struct RemoteCall {
    pub id: Uuid,
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub provider: String,
    pub model: String,
    pub options: CallOptions,
    pub signal: Option<CancellationToken>,
}

/// What the injected executor returns.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Aggregated configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
    pub chunker: ChunkerConfig,
    pub budget: BudgetConfig,
    pub enable_cache: bool,
    pub enable_context_optimization: bool,
    pub enable_token_optimization: bool,
    /// Single-message content size, in bytes, above which the chunker runs.
    pub context_optimization_threshold: usize,
    /// Output tokens reserved out of the model's context window.
    pub reserved_output_tokens: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
            batch: BatchConfig::default(),
            chunker: ChunkerConfig::default(),
            budget: BudgetConfig::default(),
            enable_cache: true,
            enable_context_optimization: true,
            enable_token_optimization: true,
            context_optimization_threshold: 6000,
            reserved_output_tokens: 4096,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file.
    pub fn from_toml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;
        toml::from_str(&content).context("Failed to parse TOML configuration")
    }

    /// Save to a TOML file.
    pub fn to_toml_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))
    }
}
