//! # Promptgate
//!
//! A performance and resilience layer that sits in front of every call an
//! application makes to a remote LLM backend. The crate owns no wire
//! format and talks to no network itself: the actual remote call is an
//! injected collaborator. Everything around that call (caching, failure
//! guarding, batching, context shaping, token budgeting) is handled here.
//!
//! ## Architecture Overview
//!
//! The system consists of several components composed by one pipeline:
//!
//! - **[`cache`]**: Bounded response cache with TTL and LRU eviction
//! - **[`recovery`]**: Per-operation circuit breakers and bounded
//!   exponential-backoff retry
//! - **[`batch`]**: Per-provider queues that coalesce concurrent calls into
//!   adaptively sized and timed batches
//! - **[`context`]**: Relevance-scored chunking of oversized documents
//! - **[`budget`]**: Token estimation, over-budget optimization and usage
//!   tracking against model capability profiles
//! - **[`pipeline`]**: The orchestrator tying it all together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use promptgate::{
//!     ChatRequest, Message, NoopRecorder, PipelineConfig, RemoteExecutor, RequestPipeline,
//! };
//! use std::sync::Arc;
//!
//! # fn make_executor() -> Arc<dyn RemoteExecutor> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // The executor is the host's bridge to its actual LLM backend.
//!     let executor: Arc<dyn RemoteExecutor> = make_executor();
//!     let pipeline = RequestPipeline::new(
//!         PipelineConfig::default(),
//!         executor,
//!         Arc::new(NoopRecorder),
//!     );
//!
//!     let request = ChatRequest::new(
//!         vec![Message::user("Summarize my meeting notes")],
//!         "You are a concise assistant.",
//!         "anthropic",
//!         "claude-3-5-sonnet",
//!     );
//!     let response = pipeline.process(request).await?;
//!     println!("{} (cached: {})", response.content, response.metadata.cache_hit);
//!     Ok(())
//! }
//! ```

/// Bounded response cache with TTL expiry and LRU eviction.
///
/// Keyed by deterministic request fingerprints; all failure modes degrade
/// to cache misses.
pub mod cache;

/// Failure recovery: per-operation circuit breakers and the retry executor.
///
/// Breakers serialize their own transitions so concurrent callers cannot
/// race past the half-open probe; retries observe cancellation at every
/// suspension point.
pub mod recovery;

/// Adaptive request batching.
///
/// One queue per provider, priority insertion, debounce timers scaled by
/// queue fullness, system load and recent processing speed.
pub mod batch;

/// Context chunking with relevance scoring.
///
/// Splits oversized documents at semantic boundaries, scores chunks against
/// query keywords and selects the best subset inside the context budget.
pub mod context;

/// Token budgets: estimation, optimization and usage statistics.
pub mod budget;

/// The request pipeline composing all components, and its configuration.
pub mod pipeline;

/// Error taxonomy shared across components.
pub mod error;

/// Injectable telemetry recorder.
pub mod metrics;

// Re-export the main cache types
pub use cache::{CacheConfig, CacheStats, CachedResponse, ResponseCache, request_fingerprint};

// Re-export the main recovery types
pub use recovery::{
    BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState, RetryExecutor, RetryOutcome,
    RetryPolicy,
};

// Re-export the main batching types
pub use batch::{BatchConfig, BatchRunner, BatchScheduler, SchedulerStatus};

// Re-export the main context types
pub use context::{ChunkedDocument, ChunkerConfig, ContextChunk, ContextChunker};

// Re-export the main budget types
pub use budget::{
    BudgetConfig, Message, ModelProfile, OptimizationReport, Role, TokenBudgetManager, TokenUsage,
    TokenUsageRecord, UsageStats,
};

// Re-export the pipeline surface
pub use error::{CallError, PipelineError};
pub use metrics::{Metric, MetricUnit, MetricsRecorder, NoopRecorder, TracingRecorder};
pub use pipeline::{
    CallOptions, ChatRequest, ChatResponse, PipelineConfig, RemoteCall, RemoteExecutor,
    RemoteResponse, RequestPipeline, ResponseMetadata,
};
