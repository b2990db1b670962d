use crate::error::{CallError, PipelineError};
use crate::metrics::{Metric, MetricUnit, MetricsRecorder};
use crate::recovery::types::{BreakerConfig, BreakerSnapshot, CircuitState};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Per-operation failure guard.
///
/// One breaker instance guards one named operation; all of its transitions
/// run under a single lock so concurrent callers cannot race past the
/// half-open probe. While half-open, exactly one probe call is admitted at a
/// time; everyone else is rejected until the probe resolves.
#[derive(Debug)]
pub struct CircuitBreaker {
    operation: String,
    config: BreakerConfig,
    metrics: Arc<dyn MetricsRecorder>,
    state: Mutex<BreakerState>,
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    /// Closed-state failure timestamps, pruned to the monitor window.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    probe_in_flight: bool,
}

/// Outcome of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed; `probe` marks the single half-open trial call.
    Allowed { probe: bool },
    /// Short-circuited; no call may be made.
    Rejected { retry_after: Option<Duration> },
}

impl CircuitBreaker {
    pub fn new(
        operation: impl Into<String>,
        config: BreakerConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            operation: operation.into(),
            config,
            metrics,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                half_open_successes: 0,
                probe_in_flight: false,
            }),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Atomically decide whether a call may proceed, performing the
    /// Open-to-HalfOpen transition when the cooldown has elapsed.
    pub async fn try_acquire(&self) -> Admission {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        match state.circuit {
            CircuitState::Closed => Admission::Allowed { probe: false },
            CircuitState::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.config.timeout {
                    state.circuit = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    state.probe_in_flight = true;
                    info!(operation = %self.operation, "circuit half-open, admitting probe");
                    self.emit_transition(CircuitState::HalfOpen);
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected {
                        retry_after: Some(self.config.timeout - elapsed),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Admission::Rejected { retry_after: None }
                } else {
                    state.probe_in_flight = true;
                    Admission::Allowed { probe: true }
                }
            }
        }
    }

    /// Record a successful call.
    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;
        match state.circuit {
            CircuitState::Closed => {
                // A success decays one recorded failure.
                state.failures.pop_front();
            }
            CircuitState::HalfOpen => {
                state.probe_in_flight = false;
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.success_threshold {
                    state.circuit = CircuitState::Closed;
                    state.failures.clear();
                    state.opened_at = None;
                    state.half_open_successes = 0;
                    info!(operation = %self.operation, "circuit closed");
                    self.emit_transition(CircuitState::Closed);
                }
            }
            // A call admitted before the circuit opened may still land here.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub async fn on_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.circuit {
            CircuitState::Closed => {
                state.failures.push_back(now);
                while state.failures.front().is_some_and(|&ts| {
                    now.saturating_duration_since(ts) > self.config.monitor_window
                }) {
                    state.failures.pop_front();
                }
                if state.failures.len() as u32 >= self.config.failure_threshold {
                    state.circuit = CircuitState::Open;
                    state.opened_at = Some(now);
                    warn!(
                        operation = %self.operation,
                        failures = state.failures.len(),
                        "circuit opened"
                    );
                    self.emit_transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                state.probe_in_flight = false;
                state.circuit = CircuitState::Open;
                state.opened_at = Some(now);
                warn!(operation = %self.operation, "probe failed, circuit reopened");
                self.emit_transition(CircuitState::Open);
            }
            CircuitState::Open => {
                // Late failure from a call admitted earlier refreshes the cooldown.
                state.opened_at = Some(now);
            }
        }
    }

    /// Release an admitted call that was abandoned before completing, e.g.
    /// by cancellation. Counts as neither success nor failure; it only
    /// frees the half-open probe slot.
    pub async fn on_abandoned(&self) {
        let mut state = self.state.lock().await;
        state.probe_in_flight = false;
    }

    /// Run `call` under the breaker, recording its outcome.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        match self.try_acquire().await {
            Admission::Rejected { retry_after } => Err(PipelineError::CircuitOpen {
                operation: self.operation.clone(),
                retry_after,
            }),
            Admission::Allowed { .. } => match call().await {
                Ok(value) => {
                    self.on_success().await;
                    Ok(value)
                }
                Err(err) => {
                    self.on_failure().await;
                    Err(PipelineError::Call(err))
                }
            },
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.circuit
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock().await;
        BreakerSnapshot {
            operation: self.operation.clone(),
            state: state.circuit,
            recent_failures: state.failures.len() as u32,
            half_open_successes: state.half_open_successes,
        }
    }

    /// Return to a pristine closed state. Idempotent.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.circuit = CircuitState::Closed;
        state.failures.clear();
        state.opened_at = None;
        state.half_open_successes = 0;
        state.probe_in_flight = false;
    }

    fn emit_transition(&self, to: CircuitState) {
        self.metrics.record_metric(
            Metric::new("breaker.transition", 1.0, MetricUnit::Count)
                .with_tag("operation", self.operation.clone())
                .with_tag("state", format!("{to:?}")),
        );
    }
}

/// Process-wide registry of breakers, one per named operation.
///
/// Each breaker serializes its own state; unrelated operations never
/// contend with each other.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    metrics: Arc<dyn MetricsRecorder>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            config,
            metrics,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for `operation`, created on first use.
    pub fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    operation,
                    self.config.clone(),
                    self.metrics.clone(),
                ))
            })
            .clone()
    }

    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots
    }

    /// Reset one operation's breaker. Idempotent; a no-op for unknown names.
    pub async fn reset(&self, operation: &str) {
        if let Some(breaker) = self.breakers.get(operation).map(|e| e.value().clone()) {
            breaker.reset().await;
        }
    }

    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }
}
