use crate::batch::types::{BatchConfig, QueueDepth, SchedulerStatus};
use crate::error::PipelineError;
use crate::metrics::{Metric, MetricUnit, MetricsRecorder};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Queue-fullness multiplier never drops the wait below this fraction.
const FULLNESS_FLOOR: f64 = 0.3;
/// System-load multiplier never drops the wait below this fraction.
const LOAD_FLOOR: f64 = 0.5;
/// Below this active-batch ratio the system counts as idle enough to flush
/// small batches eagerly.
const LOW_LOAD_RATIO: f64 = 0.5;
/// An item older than this fraction of `max_wait_time` forces a flush.
const AGE_FLUSH_FRACTION: f64 = 0.8;
/// Lower clamp for the adaptive debounce wait.
const MIN_ADAPTIVE_WAIT: Duration = Duration::from_millis(100);
/// Re-check interval when a due flush is deferred by the concurrency cap.
const CAP_DEFER_DELAY: Duration = Duration::from_millis(50);
/// Average batch durations under this count as "fast processing".
const FAST_PROCESSING_CUTOFF: Duration = Duration::from_millis(500);
/// Processing-speed multiplier floor.
const SPEED_FACTOR_FLOOR: f64 = 0.4;
/// Ring size for recent batch durations.
const PROCESSING_SAMPLES: usize = 20;

/// Executes one extracted batch downstream.
///
/// `Ok` carries one result per payload, in payload order. An outer `Err` is
/// a batch-wide failure: the scheduler rejects every member of the batch
/// with a clone of that error.
#[async_trait]
pub trait BatchRunner<P, R>: Send + Sync {
    async fn run(
        &self,
        provider: &str,
        payloads: Vec<P>,
    ) -> Result<Vec<Result<R, PipelineError>>, PipelineError>;
}

struct QueuedRequest<P, R> {
    id: Uuid,
    payload: P,
    priority: i32,
    enqueued_at: Instant,
    responder: oneshot::Sender<Result<R, PipelineError>>,
    signal: Option<CancellationToken>,
}

struct QueueState<P, R> {
    items: VecDeque<QueuedRequest<P, R>>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every (re)arm; a firing timer with a stale generation has
    /// been superseded and does nothing.
    timer_generation: u64,
}

struct ProviderQueue<P, R> {
    provider: String,
    state: Mutex<QueueState<P, R>>,
}

struct Inner<P, R> {
    config: BatchConfig,
    runner: Arc<dyn BatchRunner<P, R>>,
    metrics: Arc<dyn MetricsRecorder>,
    queues: DashMap<String, Arc<ProviderQueue<P, R>>>,
    active_batches: AtomicUsize,
    avg_processing_ms: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
}

/// Per-provider batching queue with adaptive flush timing.
///
/// Concurrent submissions against one provider coalesce into batches sized
/// and timed by queue fullness, system load and recent processing speed.
/// Each provider queue serializes its own state; different providers never
/// contend. Cloning the scheduler clones a handle to the same queues.
pub struct BatchScheduler<P, R> {
    inner: Arc<Inner<P, R>>,
}

impl<P, R> Clone for BatchScheduler<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P, R> BatchScheduler<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn new(
        config: BatchConfig,
        runner: Arc<dyn BatchRunner<P, R>>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                metrics,
                queues: DashMap::new(),
                active_batches: AtomicUsize::new(0),
                avg_processing_ms: AtomicU64::new(0),
                samples: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Enqueue a payload and wait for its individual result.
    ///
    /// Cancelling `signal` rejects this caller immediately; the queued item
    /// is skipped at extraction time without consuming batch capacity.
    pub async fn submit(
        &self,
        provider: &str,
        payload: P,
        priority: i32,
        signal: Option<CancellationToken>,
    ) -> Result<R, PipelineError> {
        let (responder, receiver) = oneshot::channel();
        let request = QueuedRequest {
            id: Uuid::new_v4(),
            payload,
            priority,
            enqueued_at: Instant::now(),
            responder,
            signal: signal.clone(),
        };
        self.enqueue(provider, request).await;

        match signal {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(PipelineError::Aborted),
                    result = receiver => result.unwrap_or_else(|_| {
                        Err(PipelineError::BatchFailed {
                            message: "batch worker dropped the request".to_string(),
                        })
                    }),
                }
            }
            None => receiver.await.unwrap_or_else(|_| {
                Err(PipelineError::BatchFailed {
                    message: "batch worker dropped the request".to_string(),
                })
            }),
        }
    }

    pub async fn queue_depth(&self, provider: &str) -> usize {
        match self.inner.queues.get(provider).map(|e| e.value().clone()) {
            Some(queue) => queue.state.lock().await.items.len(),
            None => 0,
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        let queues: Vec<Arc<ProviderQueue<P, R>>> = self
            .inner
            .queues
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut depths = Vec::with_capacity(queues.len());
        for queue in queues {
            let state = queue.state.lock().await;
            depths.push(QueueDepth {
                provider: queue.provider.clone(),
                depth: state.items.len(),
                oldest_age: state.items.iter().map(|item| item.enqueued_at.elapsed()).max(),
            });
        }
        SchedulerStatus {
            queues: depths,
            active_batches: self.inner.active_batches.load(Ordering::SeqCst),
            avg_processing_time: Duration::from_millis(
                self.inner.avg_processing_ms.load(Ordering::Relaxed),
            ),
        }
    }

    async fn enqueue(&self, provider: &str, request: QueuedRequest<P, R>) {
        let queue = self.queue(provider);
        let mut state = queue.state.lock().await;

        if self.inner.config.priority_queuing {
            // Descending priority; insertion after equals keeps FIFO ties.
            let pos = state
                .items
                .iter()
                .position(|item| item.priority < request.priority)
                .unwrap_or(state.items.len());
            state.items.insert(pos, request);
        } else {
            state.items.push_back(request);
        }

        self.inner.metrics.record_metric(
            Metric::new("batch.queue_depth", state.items.len() as f64, MetricUnit::Count)
                .with_tag("provider", provider.to_string()),
        );

        self.evaluate_queue(&queue, &mut state);
    }

    fn queue(&self, provider: &str) -> Arc<ProviderQueue<P, R>> {
        self.inner
            .queues
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(ProviderQueue {
                    provider: provider.to_string(),
                    state: Mutex::new(QueueState {
                        items: VecDeque::new(),
                        timer: None,
                        timer_generation: 0,
                    }),
                })
            })
            .clone()
    }

    /// Flush now when a trigger condition holds, otherwise (re)arm the
    /// debounce timer with the adaptive wait.
    fn evaluate_queue(&self, queue: &Arc<ProviderQueue<P, R>>, state: &mut QueueState<P, R>) {
        if state.items.is_empty() {
            return;
        }
        if self.should_flush_now(state) {
            self.try_flush(queue, state);
        } else {
            let wait = self.adaptive_wait(state.items.len());
            self.arm_timer(queue, state, wait);
        }
    }

    fn should_flush_now(&self, state: &QueueState<P, R>) -> bool {
        let config = &self.inner.config;
        let len = state.items.len();

        if len >= config.max_batch_size {
            return true;
        }
        if self.load_ratio() < LOW_LOAD_RATIO && len >= config.min_batch_size {
            return true;
        }
        if let Some(oldest) = state.items.iter().map(|item| item.enqueued_at).min()
            && oldest.elapsed().as_secs_f64()
                > config.max_wait_time.as_secs_f64() * AGE_FLUSH_FRACTION
        {
            return true;
        }
        let avg_ms = self.inner.avg_processing_ms.load(Ordering::Relaxed);
        if avg_ms > 0
            && Duration::from_millis(avg_ms) < FAST_PROCESSING_CUTOFF
            && len >= config.min_batch_size
        {
            return true;
        }
        false
    }

    /// Debounce wait scaled by queue fullness, system load and recent
    /// processing speed; fuller, busier or faster all shorten it. Clamped
    /// to [`MIN_ADAPTIVE_WAIT`, `max_wait_time`].
    fn adaptive_wait(&self, queue_len: usize) -> Duration {
        let config = &self.inner.config;
        let base = config.max_wait_time.as_secs_f64();

        let fullness = queue_len as f64 / config.max_batch_size.max(1) as f64;
        let fullness_factor = (1.0 - fullness).max(FULLNESS_FLOOR);

        let load_factor = (1.0 - self.load_ratio() * (1.0 - LOAD_FLOOR)).max(LOAD_FLOOR);

        let avg_ms = self.inner.avg_processing_ms.load(Ordering::Relaxed);
        let speed_factor = if avg_ms == 0 {
            1.0
        } else {
            (avg_ms as f64 / FAST_PROCESSING_CUTOFF.as_millis() as f64)
                .clamp(SPEED_FACTOR_FLOOR, 1.0)
        };

        let wait = Duration::from_secs_f64(base * fullness_factor * load_factor * speed_factor);
        wait.clamp(MIN_ADAPTIVE_WAIT, config.max_wait_time)
    }

    fn load_ratio(&self) -> f64 {
        self.inner.active_batches.load(Ordering::SeqCst) as f64
            / self.inner.config.max_concurrent_batches.max(1) as f64
    }

    fn arm_timer(&self, queue: &Arc<ProviderQueue<P, R>>, state: &mut QueueState<P, R>, wait: Duration) {
        state.timer_generation += 1;
        let generation = state.timer_generation;
        if let Some(old) = state.timer.take() {
            old.abort();
        }
        let scheduler = self.clone();
        let queue = queue.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            scheduler.flush_due(queue, generation).await;
        }));
    }

    async fn flush_due(&self, queue: Arc<ProviderQueue<P, R>>, generation: u64) {
        let mut state = queue.state.lock().await;
        if state.timer_generation != generation {
            return;
        }
        state.timer = None;
        if state.items.is_empty() {
            return;
        }
        self.try_flush(&queue, &mut state);
    }

    /// Extract and dispatch one batch, deferring when the concurrency cap
    /// is reached. A due flush is never dropped, only retried.
    fn try_flush(&self, queue: &Arc<ProviderQueue<P, R>>, state: &mut QueueState<P, R>) {
        let config = &self.inner.config;
        let active = self.inner.active_batches.load(Ordering::SeqCst);
        if active >= config.max_concurrent_batches {
            debug!(
                provider = %queue.provider,
                active,
                "concurrency cap reached, deferring flush"
            );
            self.arm_timer(queue, state, CAP_DEFER_DELAY);
            return;
        }

        let batch = Self::extract_batch(state, config.max_batch_size);
        if batch.is_empty() {
            // Everything pulled was already cancelled.
            if !state.items.is_empty() {
                let wait = self.adaptive_wait(state.items.len());
                self.arm_timer(queue, state, wait);
            }
            return;
        }

        self.inner.active_batches.fetch_add(1, Ordering::SeqCst);
        if state.items.is_empty() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.timer_generation += 1;
        } else {
            // A queue still past a flush trigger re-flushes promptly.
            let wait = if self.should_flush_now(state) {
                CAP_DEFER_DELAY
            } else {
                self.adaptive_wait(state.items.len())
            };
            self.arm_timer(queue, state, wait);
        }

        let scheduler = self.clone();
        let provider = queue.provider.clone();
        tokio::spawn(async move {
            scheduler.run_batch(provider, batch).await;
        });
    }

    /// Pop up to `max` dispatchable items in queue order. Cancelled items
    /// are rejected in place and never reach the runner or count against
    /// batch capacity.
    fn extract_batch(state: &mut QueueState<P, R>, max: usize) -> Vec<QueuedRequest<P, R>> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(item) = state.items.pop_front() else {
                break;
            };
            if item.signal.as_ref().is_some_and(|token| token.is_cancelled()) {
                debug!(id = %item.id, "dropping cancelled request at extraction");
                let _ = item.responder.send(Err(PipelineError::Aborted));
                continue;
            }
            batch.push(item);
        }
        batch
    }

    async fn run_batch(&self, provider: String, batch: Vec<QueuedRequest<P, R>>) {
        let started = Instant::now();
        let size = batch.len();
        let mut payloads = Vec::with_capacity(size);
        let mut waiters = Vec::with_capacity(size);
        for item in batch {
            payloads.push(item.payload);
            waiters.push(item.responder);
        }

        debug!(provider = %provider, size, "executing batch");
        match self.inner.runner.run(&provider, payloads).await {
            Ok(results) => {
                let expected = waiters.len();
                let got = results.len();
                if got != expected {
                    warn!(provider = %provider, expected, got, "batch runner result count mismatch");
                }
                let mut results = results.into_iter();
                for responder in waiters {
                    let outcome = results.next().unwrap_or_else(|| {
                        Err(PipelineError::BatchFailed {
                            message: format!(
                                "batch runner returned {got} results for {expected} items"
                            ),
                        })
                    });
                    let _ = responder.send(outcome);
                }
            }
            Err(error) => {
                warn!(provider = %provider, %error, "batch failed as a whole");
                self.inner
                    .metrics
                    .record_error("batch_scheduler", &error.to_string());
                for responder in waiters {
                    let _ = responder.send(Err(error.clone()));
                }
            }
        }

        let elapsed = started.elapsed();
        self.record_processing_time(elapsed).await;
        self.inner.active_batches.fetch_sub(1, Ordering::SeqCst);
        self.inner.metrics.record_metric(
            Metric::new("batch.size", size as f64, MetricUnit::Count)
                .with_tag("provider", provider.clone()),
        );
        self.inner.metrics.record_metric(
            Metric::new(
                "batch.duration",
                elapsed.as_millis() as f64,
                MetricUnit::Milliseconds,
            )
            .with_tag("provider", provider),
        );
    }

    async fn record_processing_time(&self, elapsed: Duration) {
        let mut samples = self.inner.samples.lock().await;
        samples.push_back(elapsed.as_millis() as u64);
        while samples.len() > PROCESSING_SAMPLES {
            samples.pop_front();
        }
        let avg = samples.iter().sum::<u64>() / samples.len() as u64;
        self.inner.avg_processing_ms.store(avg, Ordering::Relaxed);
    }
}
