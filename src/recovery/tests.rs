use super::breaker::Admission;
use super::*;
use crate::error::{CallError, PipelineError};
use crate::metrics::NoopRecorder;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn breaker_config() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        success_threshold: 1,
        timeout: Duration::from_secs(30),
        monitor_window: Duration::from_secs(60),
    }
}

fn test_breaker(config: BreakerConfig) -> CircuitBreaker {
    CircuitBreaker::new("test-op", config, Arc::new(NoopRecorder))
}

fn registry() -> Arc<BreakerRegistry> {
    Arc::new(BreakerRegistry::new(breaker_config(), Arc::new(NoopRecorder)))
}

fn executor(policy: RetryPolicy) -> RetryExecutor {
    RetryExecutor::new(policy, registry(), Arc::new(NoopRecorder))
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_factor: 2.0,
        jitter_factor: 0.2,
    }
}

#[tokio::test]
async fn test_breaker_opens_after_threshold_failures() {
    let breaker = test_breaker(breaker_config());
    for _ in 0..3 {
        assert!(matches!(
            breaker.try_acquire().await,
            Admission::Allowed { .. }
        ));
        breaker.on_failure().await;
    }
    assert_eq!(breaker.state().await, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_rejects_before_timeout() {
    let breaker = test_breaker(breaker_config());
    for _ in 0..3 {
        breaker.on_failure().await;
    }

    tokio::time::advance(Duration::from_secs(10)).await;
    let admission = breaker.try_acquire().await;
    assert!(matches!(admission, Admission::Rejected { .. }));
    if let Admission::Rejected {
        retry_after: Some(remaining),
    } = admission
    {
        assert!(remaining <= Duration::from_secs(20));
    }
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_closes_on_success() {
    let breaker = test_breaker(breaker_config());
    for _ in 0..3 {
        breaker.on_failure().await;
    }

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(matches!(
        breaker.try_acquire().await,
        Admission::Allowed { probe: true }
    ));
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    // Only one probe at a time.
    assert!(matches!(
        breaker.try_acquire().await,
        Admission::Rejected { .. }
    ));

    breaker.on_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens_immediately() {
    let breaker = test_breaker(breaker_config());
    for _ in 0..3 {
        breaker.on_failure().await;
    }

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(matches!(
        breaker.try_acquire().await,
        Admission::Allowed { probe: true }
    ));
    breaker.on_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    // The reopened cooldown starts over.
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(matches!(
        breaker.try_acquire().await,
        Admission::Rejected { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failures_outside_monitor_window_are_pruned() {
    let breaker = test_breaker(breaker_config());
    breaker.on_failure().await;
    breaker.on_failure().await;

    // The old failures age out of the window before the third arrives.
    tokio::time::advance(Duration::from_secs(61)).await;
    breaker.on_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_eq!(breaker.snapshot().await.recent_failures, 1);
}

#[tokio::test]
async fn test_success_threshold_above_one_needs_multiple_probes() {
    let config = BreakerConfig {
        success_threshold: 2,
        timeout: Duration::from_millis(0),
        ..breaker_config()
    };
    let breaker = test_breaker(config);
    for _ in 0..3 {
        breaker.on_failure().await;
    }

    assert!(matches!(
        breaker.try_acquire().await,
        Admission::Allowed { probe: true }
    ));
    breaker.on_success().await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    assert!(matches!(
        breaker.try_acquire().await,
        Admission::Allowed { probe: true }
    ));
    breaker.on_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let breaker = test_breaker(breaker_config());
    for _ in 0..3 {
        breaker.on_failure().await;
    }
    breaker.reset().await;
    breaker.reset().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_eq!(breaker.snapshot().await.recent_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_final_attempt() {
    let executor = executor(fast_policy(3));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let outcome = executor
        .execute("op", None, move || {
            let counter = counter.clone();
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(CallError::Timeout("slow upstream".to_string()))
                } else {
                    Ok("done")
                }
            })
        })
        .await;

    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.result.unwrap(), "done");
    assert_eq!(outcome.retry_delays.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_never_exceed_max() {
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(40),
        max_delay: Duration::from_millis(100),
        backoff_factor: 3.0,
        jitter_factor: 0.5,
    };
    let executor = RetryExecutor::new(policy, registry(), Arc::new(NoopRecorder));

    let outcome = executor
        .execute("op", None, || {
            Box::pin(async { Err::<(), _>(CallError::Network("down".to_string())) })
        })
        .await;

    assert_eq!(outcome.attempts, 5);
    assert_eq!(outcome.retry_delays.len(), 4);
    for delay in &outcome.retry_delays {
        assert!(*delay <= Duration::from_millis(100));
    }
    match outcome.result {
        Err(PipelineError::RetryExhausted {
            attempts,
            last_error: CallError::Network(_),
        }) => assert_eq!(attempts, 5),
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_retryable_error_fails_on_first_attempt() {
    let executor = executor(fast_policy(3));

    let outcome = executor
        .execute("op", None, || {
            Box::pin(async {
                Err::<(), _>(CallError::Http {
                    status: 400,
                    message: "bad request".to_string(),
                })
            })
        })
        .await;

    assert_eq!(outcome.attempts, 1);
    assert!(outcome.retry_delays.is_empty());
    match outcome.result {
        Err(PipelineError::Call(CallError::Http { status, .. })) => assert_eq!(status, 400),
        other => panic!("expected Call error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_429_is_retryable() {
    let executor = executor(fast_policy(2));

    let outcome = executor
        .execute("op", None, || {
            Box::pin(async {
                Err::<(), _>(CallError::Http {
                    status: 429,
                    message: "rate limited".to_string(),
                })
            })
        })
        .await;

    assert_eq!(outcome.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff_aborts() {
    let executor = executor(RetryPolicy {
        base_delay: Duration::from_secs(5),
        ..fast_policy(3)
    });
    let token = CancellationToken::new();
    let cancel = token.clone();

    // Cancel while the executor is sleeping between attempts.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });

    let outcome = executor
        .execute("op", Some(&token), || {
            Box::pin(async { Err::<(), _>(CallError::Network("flaky".to_string())) })
        })
        .await;

    assert_eq!(outcome.attempts, 1);
    assert!(matches!(outcome.result, Err(PipelineError::Aborted)));
    assert!(outcome.result.unwrap_err().is_cancellation());
}

#[tokio::test]
async fn test_open_circuit_short_circuits_without_calling() {
    let breakers = registry();
    let breaker = breakers.breaker("op");
    for _ in 0..3 {
        breaker.on_failure().await;
    }

    let executor = RetryExecutor::new(fast_policy(3), breakers, Arc::new(NoopRecorder));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let outcome = executor
        .execute("op", None, move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.attempts, 0);
    assert!(matches!(
        outcome.result,
        Err(PipelineError::CircuitOpen { .. })
    ));
}
