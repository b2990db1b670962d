use crate::batch::{BatchRunner, BatchScheduler, SchedulerStatus};
use crate::budget::{ModelProfile, TokenBudgetManager, TokenUsage, TokenUsageRecord, UsageStats};
use crate::cache::{CacheStats, CachedResponse, ResponseCache, request_fingerprint};
use crate::context::ContextChunker;
use crate::error::PipelineError;
use crate::metrics::{Metric, MetricUnit, MetricsRecorder};
use crate::pipeline::executor::RemoteExecutor;
use crate::pipeline::types::{
    ChatRequest, ChatResponse, PipelineConfig, RemoteCall, RemoteResponse, ResponseMetadata,
};
use crate::recovery::{BreakerRegistry, BreakerSnapshot, RetryExecutor};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// The request pipeline in front of every remote LLM call.
///
/// Each request flows through cache lookup, context optimization, token
/// optimization, execution (direct or batched, retry- and
/// breaker-protected), cache store and usage recording. All components are
/// owned by the pipeline and injected at construction, so tests build fresh
/// instances instead of resetting shared globals.
pub struct RequestPipeline {
    config: PipelineConfig,
    cache: Arc<ResponseCache>,
    breakers: Arc<BreakerRegistry>,
    retry: Arc<RetryExecutor>,
    scheduler: Option<BatchScheduler<RemoteCall, RemoteResponse>>,
    chunker: ContextChunker,
    budget: Arc<TokenBudgetManager>,
    executor: Arc<dyn RemoteExecutor>,
    metrics: Arc<dyn MetricsRecorder>,
}

/// Aggregated observability snapshot across all components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub cache: CacheStats,
    pub breakers: Vec<BreakerSnapshot>,
    pub scheduler: Option<SchedulerStatus>,
    pub usage: UsageStats,
}

/// Executes batch members individually through the retry executor, so each
/// member gets its own breaker-guarded retry envelope.
struct RetryingBatchRunner {
    retry: Arc<RetryExecutor>,
    executor: Arc<dyn RemoteExecutor>,
}

#[async_trait]
impl BatchRunner<RemoteCall, RemoteResponse> for RetryingBatchRunner {
    async fn run(
        &self,
        provider: &str,
        payloads: Vec<RemoteCall>,
    ) -> Result<Vec<Result<RemoteResponse, PipelineError>>, PipelineError> {
        let calls = payloads.into_iter().map(|call| {
            let retry = self.retry.clone();
            let executor = self.executor.clone();
            let operation = provider.to_string();
            async move {
                let signal = call.signal.clone();
                let outcome = retry
                    .execute(&operation, signal.as_ref(), move || {
                        let executor = executor.clone();
                        let call = call.clone();
                        Box::pin(async move { executor.execute(call).await })
                    })
                    .await;
                outcome.result
            }
        });
        Ok(futures::future::join_all(calls).await)
    }
}

impl RequestPipeline {
    pub fn new(
        config: PipelineConfig,
        executor: Arc<dyn RemoteExecutor>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache.clone(), metrics.clone()));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone(), metrics.clone()));
        let retry = Arc::new(RetryExecutor::new(
            config.retry.clone(),
            breakers.clone(),
            metrics.clone(),
        ));
        let scheduler = config.batch.enabled.then(|| {
            let runner = Arc::new(RetryingBatchRunner {
                retry: retry.clone(),
                executor: executor.clone(),
            });
            BatchScheduler::new(config.batch.clone(), runner, metrics.clone())
        });
        let chunker = ContextChunker::new(config.chunker.clone(), metrics.clone());
        let budget = Arc::new(TokenBudgetManager::new(config.budget.clone(), metrics.clone()));

        info!(
            cache = config.enable_cache,
            batching = config.batch.enabled,
            "request pipeline initialized"
        );

        Self {
            config,
            cache,
            breakers,
            retry,
            scheduler,
            chunker,
            budget,
            executor,
            metrics,
        }
    }

    /// Process one request through the full pipeline.
    pub async fn process(&self, request: ChatRequest) -> Result<ChatResponse, PipelineError> {
        let started = Instant::now();
        let signal = request.signal.clone();
        if signal.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Err(PipelineError::Aborted);
        }

        let fingerprint = request_fingerprint(
            request
                .messages
                .iter()
                .map(|m| (m.role.as_str(), m.content.as_str())),
            &request.system_prompt,
            &request.provider,
            &request.model,
        );

        if self.config.enable_cache
            && let Some(hit) = self.cache.get(&fingerprint).await
        {
            debug!(provider = %request.provider, "serving response from cache");
            return Ok(ChatResponse {
                usage: TokenUsage {
                    input_tokens: hit.input_tokens,
                    output_tokens: hit.output_tokens,
                },
                metadata: ResponseMetadata {
                    cache_hit: true,
                    optimized: false,
                    original_tokens: hit.input_tokens,
                    final_tokens: hit.input_tokens,
                    processing_time: started.elapsed(),
                    optimizations: Vec::new(),
                },
                content: hit.content,
            });
        }

        let profile = ModelProfile::for_model(&request.model);
        let mut messages = request.messages.clone();
        let mut system_prompt = request.system_prompt.clone();
        let mut optimizations = Vec::new();
        let original_tokens =
            self.budget
                .estimate_request_tokens(&messages, &system_prompt, &profile);

        if self.config.enable_context_optimization
            && let Some(index) = messages
                .iter()
                .enumerate()
                .filter(|(_, m)| m.content.len() > self.config.context_optimization_threshold)
                .max_by_key(|(_, m)| m.content.len())
                .map(|(index, _)| index)
        {
            // The newest message doubles as the relevance query unless it is
            // the one being chunked.
            let query = if index + 1 < messages.len() {
                messages.last().map(|m| m.content.clone())
            } else {
                None
            };
            let chunked = self
                .chunker
                .process(&messages[index].content, query.as_deref());
            if chunked.dropped_size > 0 {
                debug!(
                    dropped_bytes = chunked.dropped_size,
                    kept_chunks = chunked.stats.chunk_count,
                    "chunked oversized message"
                );
                messages[index].content = chunked.joined_content();
                optimizations.push("context_chunking".to_string());
            }
        }

        if self.config.enable_token_optimization {
            let (optimized_messages, optimized_system, report) = self.budget.optimize(
                &messages,
                &system_prompt,
                &profile,
                self.config.reserved_output_tokens,
            );
            messages = optimized_messages;
            system_prompt = optimized_system;
            optimizations.extend(report.optimizations);
        }

        let final_tokens =
            self.budget
                .estimate_request_tokens(&messages, &system_prompt, &profile);

        let call = RemoteCall {
            id: Uuid::new_v4(),
            messages,
            system_prompt,
            provider: request.provider.clone(),
            model: request.model.clone(),
            options: request.options.clone(),
            signal: signal.clone(),
        };

        let response = match &self.scheduler {
            Some(scheduler) if request.options.allow_batching => {
                scheduler
                    .submit(&request.provider, call, request.options.priority, signal)
                    .await?
            }
            _ => {
                let executor = self.executor.clone();
                let outcome = self
                    .retry
                    .execute(&request.provider, signal.as_ref(), move || {
                        let executor = executor.clone();
                        let call = call.clone();
                        Box::pin(async move { executor.execute(call).await })
                    })
                    .await;
                outcome.result?
            }
        };

        let usage = response.usage;
        self.budget
            .record_usage(TokenUsageRecord {
                provider: request.provider.clone(),
                model: request.model.clone(),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cost: profile.cost(usage.input_tokens, usage.output_tokens),
                timestamp: Utc::now(),
            })
            .await;

        if self.config.enable_cache {
            self.cache
                .set(
                    &fingerprint,
                    CachedResponse {
                        content: response.content.clone(),
                        provider: request.provider.clone(),
                        model: request.model.clone(),
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        metadata: HashMap::new(),
                    },
                    request.options.cache_ttl,
                )
                .await;
        }

        let processing_time = started.elapsed();
        self.metrics.record_metric(
            Metric::new(
                "pipeline.request",
                processing_time.as_millis() as f64,
                MetricUnit::Milliseconds,
            )
            .with_tag("provider", request.provider.clone())
            .with_tag("optimized", (!optimizations.is_empty()).to_string()),
        );

        Ok(ChatResponse {
            content: response.content,
            usage,
            metadata: ResponseMetadata {
                cache_hit: false,
                optimized: !optimizations.is_empty(),
                original_tokens,
                final_tokens,
                processing_time,
                optimizations,
            },
        })
    }

    /// Aggregated snapshot across cache, breakers, scheduler and usage.
    pub async fn status(&self) -> PipelineStatus {
        PipelineStatus {
            cache: self.cache.stats().await,
            breakers: self.breakers.snapshot().await,
            scheduler: match &self.scheduler {
                Some(scheduler) => Some(scheduler.status().await),
                None => None,
            },
            usage: self.budget.usage_stats(None).await,
        }
    }

    /// Clear cache, breakers and usage history. Idempotent; meant for test
    /// isolation and host-initiated resets.
    pub async fn reset(&self) {
        self.cache.clear().await;
        self.breakers.reset_all().await;
        self.budget.clear_history().await;
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn budget(&self) -> &TokenBudgetManager {
        &self.budget
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
