//! End-to-end tests of the request pipeline with a counting mock executor.

use futures::future::BoxFuture;
use promptgate::{
    CallError, CallOptions, ChatRequest, Message, NoopRecorder, PipelineConfig, PipelineError,
    RemoteCall, RemoteExecutor, RemoteResponse, RequestPipeline, RetryPolicy, TokenUsage,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct CountingExecutor {
    calls: AtomicU32,
    fail_with: Option<CallError>,
    delay: Duration,
}

impl CountingExecutor {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_with: None,
            delay: Duration::ZERO,
        })
    }

    fn failing(error: CallError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_with: Some(error),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_with: None,
            delay,
        })
    }

    fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteExecutor for CountingExecutor {
    fn execute(&self, call: RemoteCall) -> BoxFuture<'static, Result<RemoteResponse, CallError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.fail_with.clone();
        let delay = self.delay;
        Box::pin(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = failure {
                return Err(error);
            }
            let input: u64 = call
                .messages
                .iter()
                .map(|m| m.content.len() as u64 / 4 + 1)
                .sum();
            Ok(RemoteResponse {
                content: format!("reply to {}", call.id),
                usage: TokenUsage {
                    input_tokens: input,
                    output_tokens: 12,
                },
            })
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn unbatched_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.batch.enabled = false;
    config.retry = RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        ..RetryPolicy::default()
    };
    // Keep the breaker out of the way of the retry-focused assertions.
    config.breaker.failure_threshold = 10;
    config
}

fn hi_request() -> ChatRequest {
    ChatRequest::new(vec![Message::user("Hi")], "", "p", "m")
}

#[tokio::test]
async fn test_identical_request_within_ttl_hits_cache_once() {
    init_tracing();
    let executor = CountingExecutor::ok();
    let pipeline = RequestPipeline::new(unbatched_config(), executor.clone(), Arc::new(NoopRecorder));

    let first = pipeline.process(hi_request()).await.unwrap();
    assert!(!first.metadata.cache_hit);
    assert_eq!(executor.count(), 1);

    let second = pipeline.process(hi_request()).await.unwrap();
    assert!(second.metadata.cache_hit);
    assert_eq!(second.content, first.content);
    assert_eq!(executor.count(), 1, "cache hit must not reach the executor");
}

#[tokio::test(start_paused = true)]
async fn test_cache_entry_expires_after_ttl() {
    let executor = CountingExecutor::ok();
    let mut config = unbatched_config();
    config.cache.default_ttl = Duration::from_secs(60);
    let pipeline = RequestPipeline::new(config, executor.clone(), Arc::new(NoopRecorder));

    pipeline.process(hi_request()).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    let response = pipeline.process(hi_request()).await.unwrap();

    assert!(!response.metadata.cache_hit);
    assert_eq!(executor.count(), 2);
}

#[tokio::test]
async fn test_different_requests_do_not_share_cache_entries() {
    let executor = CountingExecutor::ok();
    let pipeline = RequestPipeline::new(unbatched_config(), executor.clone(), Arc::new(NoopRecorder));

    pipeline.process(hi_request()).await.unwrap();
    let other = ChatRequest::new(vec![Message::user("Bye")], "", "p", "m");
    let response = pipeline.process(other).await.unwrap();

    assert!(!response.metadata.cache_hit);
    assert_eq!(executor.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batched_path_end_to_end() {
    let executor = CountingExecutor::ok();
    let mut config = PipelineConfig::default();
    config.retry = RetryPolicy {
        base_delay: Duration::from_millis(1),
        ..RetryPolicy::default()
    };
    config.batch.max_batch_size = 5;
    config.batch.min_batch_size = 5;
    let pipeline = Arc::new(RequestPipeline::new(
        config,
        executor.clone(),
        Arc::new(NoopRecorder),
    ));

    let requests = (0..5).map(|i| {
        let pipeline = pipeline.clone();
        async move {
            let request = ChatRequest::new(
                vec![Message::user(format!("question {i}"))],
                "",
                "p",
                "m",
            );
            pipeline.process(request).await
        }
    });
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        let response = response.unwrap();
        assert!(!response.metadata.cache_hit);
        assert!(response.content.starts_with("reply to"));
    }
    assert_eq!(executor.count(), 5, "each batch member executes exactly once");
}

#[tokio::test]
async fn test_oversized_input_is_chunked_and_annotated() {
    let executor = CountingExecutor::ok();
    let mut config = unbatched_config();
    config.context_optimization_threshold = 2000;
    config.chunker.max_chunk_size = 800;
    config.chunker.chunk_overlap = 0;
    config.chunker.max_context_size = 2400;
    let pipeline = RequestPipeline::new(config, executor.clone(), Arc::new(NoopRecorder));

    let document = "All work and no play makes a dull plugin. "
        .repeat(400)
        .split_whitespace()
        .collect::<Vec<_>>()
        .chunks(40)
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n\n");
    let request = ChatRequest::new(
        vec![
            Message::user(document),
            Message::user("what makes a dull plugin?"),
        ],
        "",
        "p",
        "m",
    );

    let response = pipeline.process(request).await.unwrap();
    assert!(response.metadata.optimized);
    assert!(
        response
            .metadata
            .optimizations
            .contains(&"context_chunking".to_string())
    );
    assert!(response.metadata.final_tokens < response.metadata.original_tokens);
}

#[tokio::test]
async fn test_terminal_error_propagates_with_original_fields() {
    let executor = CountingExecutor::failing(CallError::Http {
        status: 500,
        message: "backend exploded".to_string(),
    });
    let pipeline = RequestPipeline::new(unbatched_config(), executor.clone(), Arc::new(NoopRecorder));

    let result = pipeline.process(hi_request()).await;
    match result {
        Err(PipelineError::RetryExhausted {
            attempts,
            last_error: CallError::Http { status, message },
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(status, 500);
            assert_eq!(message, "backend exploded");
        }
        other => panic!("expected RetryExhausted with Http 500, got {other:?}"),
    }

    // Failures never populate the cache.
    let retry = pipeline.process(hi_request()).await;
    assert!(retry.is_err());
    assert_eq!(executor.count(), 6, "both attempts ran full retry envelopes");
}

#[tokio::test]
async fn test_non_retryable_error_executes_once() {
    let executor = CountingExecutor::failing(CallError::Http {
        status: 401,
        message: "bad key".to_string(),
    });
    let pipeline = RequestPipeline::new(unbatched_config(), executor.clone(), Arc::new(NoopRecorder));

    let result = pipeline.process(hi_request()).await;
    assert!(matches!(
        result,
        Err(PipelineError::Call(CallError::Http { status: 401, .. }))
    ));
    assert_eq!(executor.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_flight_surfaces_aborted() {
    let executor = CountingExecutor::slow(Duration::from_secs(30));
    let pipeline = RequestPipeline::new(unbatched_config(), executor.clone(), Arc::new(NoopRecorder));

    let token = CancellationToken::new();
    let request = hi_request().with_signal(token.clone());

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });

    let result = pipeline.process(request).await;
    match result {
        Err(error) => assert!(error.is_cancellation()),
        Ok(_) => panic!("cancelled request must not succeed"),
    }
}

#[tokio::test]
async fn test_batching_can_be_bypassed_per_call() {
    let executor = CountingExecutor::ok();
    // Batching enabled globally, disabled for this call class.
    let mut config = PipelineConfig::default();
    config.retry = RetryPolicy {
        base_delay: Duration::from_millis(1),
        ..RetryPolicy::default()
    };
    let pipeline = RequestPipeline::new(config, executor.clone(), Arc::new(NoopRecorder));

    let request = hi_request().with_options(CallOptions {
        allow_batching: false,
        ..CallOptions::default()
    });
    let response = pipeline.process(request).await.unwrap();
    assert!(!response.metadata.cache_hit);
    assert_eq!(executor.count(), 1);
}
