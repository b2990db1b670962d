use crate::error::CallError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures inside `monitor_window` needed to open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes needed to close it again.
    pub success_threshold: u32,
    /// Cooldown before an open circuit admits a probe.
    pub timeout: Duration,
    /// Sliding window over which closed-state failures are counted.
    pub monitor_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            monitor_window: Duration::from_secs(60),
        }
    }
}

/// Breaker state machine. Legal transitions are Closed to Open, Open to HalfOpen,
/// HalfOpen to Closed and HalfOpen to Open; nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Observable snapshot of one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub operation: String,
    pub state: CircuitState,
    /// Closed-state failures currently inside the monitor window.
    pub recent_failures: u32,
    /// Consecutive successes while half-open.
    pub half_open_successes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Total jitter width as a fraction of the delay; applied symmetrically
    /// as plus or minus (jitter_factor/2) * delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Default retry classification: transient failures retry, everything
    /// else fails fast.
    pub fn should_retry(&self, error: &CallError) -> bool {
        error.is_transient()
    }

    /// Backoff envelope for the delay after `attempt` (1-based), before
    /// jitter. Grows exponentially and is clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.backoff_factor.powi(attempt.saturating_sub(1).min(16) as i32);
        let millis = (self.base_delay.as_millis() as f64 * exp).round() as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}
