use crate::error::{CallError, PipelineError};
use crate::metrics::{Metric, MetricUnit, MetricsRecorder};
use crate::recovery::breaker::{Admission, BreakerRegistry};
use crate::recovery::types::RetryPolicy;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a retry-protected call.
///
/// `attempts` counts invocations of the wrapped call; a breaker rejection
/// does not invoke it and so does not count. `retry_delays` holds every
/// post-jitter delay that was actually slept.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, PipelineError>,
    pub attempts: u32,
    pub total_duration: Duration,
    pub retry_delays: Vec<Duration>,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Bounded exponential-backoff retry wrapped around the circuit breaker of
/// the named operation.
#[derive(Debug)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        breakers: Arc<BreakerRegistry>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            policy,
            breakers,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `call` with the default retry classification.
    pub async fn execute<T, F>(
        &self,
        operation: &str,
        signal: Option<&CancellationToken>,
        call: F,
    ) -> RetryOutcome<T>
    where
        F: Fn() -> BoxFuture<'static, Result<T, CallError>>,
    {
        self.execute_with(operation, signal, call, |error| {
            self.policy.should_retry(error)
        })
        .await
    }

    /// Execute `call` with a caller-supplied retry classification.
    ///
    /// The cancellation signal is observed before every attempt and during
    /// every backoff sleep; cancellation is reported as
    /// [`PipelineError::Aborted`], never as exhaustion.
    pub async fn execute_with<T, F, S>(
        &self,
        operation: &str,
        signal: Option<&CancellationToken>,
        call: F,
        should_retry: S,
    ) -> RetryOutcome<T>
    where
        F: Fn() -> BoxFuture<'static, Result<T, CallError>>,
        S: Fn(&CallError) -> bool,
    {
        let started = Instant::now();
        let breaker = self.breakers.breaker(operation);
        let mut retry_delays = Vec::new();
        let mut attempts: u32 = 0;

        let outcome = loop {
            if is_cancelled(signal) {
                break Err(PipelineError::Aborted);
            }

            match breaker.try_acquire().await {
                Admission::Rejected { retry_after } => {
                    break Err(PipelineError::CircuitOpen {
                        operation: operation.to_string(),
                        retry_after,
                    });
                }
                Admission::Allowed { .. } => {}
            }

            attempts += 1;
            let result = match signal {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            // The admitted call is abandoned; it counts as
                            // neither success nor failure.
                            breaker.on_abandoned().await;
                            break Err(PipelineError::Aborted);
                        }
                        result = call() => result,
                    }
                }
                None => call().await,
            };

            match result {
                Ok(value) => {
                    breaker.on_success().await;
                    break Ok(value);
                }
                Err(error) => {
                    breaker.on_failure().await;

                    if !should_retry(&error) {
                        debug!(operation, %error, "non-retryable error, failing fast");
                        break Err(PipelineError::Call(error));
                    }
                    if attempts >= self.policy.max_attempts {
                        warn!(operation, attempts, %error, "retry budget exhausted");
                        break Err(PipelineError::RetryExhausted {
                            attempts,
                            last_error: error,
                        });
                    }

                    let delay = self.jittered_delay(attempts);
                    debug!(
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying after backoff"
                    );
                    retry_delays.push(delay);

                    match signal {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => break Err(PipelineError::Aborted),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        };

        let total_duration = started.elapsed();
        self.metrics.record_metric(
            Metric::new("retry.attempts", attempts as f64, MetricUnit::Count)
                .with_tag("operation", operation.to_string())
                .with_tag("outcome", if outcome.is_ok() { "success" } else { "failure" }),
        );
        self.metrics.record_metric(
            Metric::new(
                "retry.duration",
                total_duration.as_millis() as f64,
                MetricUnit::Milliseconds,
            )
            .with_tag("operation", operation.to_string()),
        );

        RetryOutcome {
            result: outcome,
            attempts,
            total_duration,
            retry_delays,
        }
    }

    /// Backoff delay for the sleep after `attempt`, with symmetric jitter of
    /// plus or minus (jitter_factor/2) * delay, clamped to [0, max_delay].
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let envelope = self.policy.delay_for_attempt(attempt);
        let jitter = (rand::random::<f64>() - 0.5) * self.policy.jitter_factor;
        let millis = (envelope.as_millis() as f64 * (1.0 + jitter)).max(0.0) as u64;
        Duration::from_millis(millis).min(self.policy.max_delay)
    }
}

fn is_cancelled(signal: Option<&CancellationToken>) -> bool {
    signal.is_some_and(|token| token.is_cancelled())
}
