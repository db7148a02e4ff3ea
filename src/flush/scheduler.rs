/*!
 * Flush Scheduler
 * Background delivery of buffered metrics with a synchronous final flush
 *
 * Design: one tokio task per session. The task wakes on a fixed cadence
 * (the buffer's max age), when a batch is sealed, or when a flush is
 * requested, drains the buffer under its lock and sends outside it.
 *
 * Lifecycle: Running -> Stopping -> Stopped. `stop()` signals the task,
 * which finishes any in-flight send, takes the final snapshot (closing the
 * buffer), delivers it and exits; `stop()` returns after that.
 */

use super::backoff::RetryPolicy;
use super::config::FlushConfig;
use super::retry::deliver_with_retry;
use super::sleeper::{Sleeper, TokioSleeper};
use crate::core::errors::{FlushFailure, RecordError, SchedulerClosedError, TrackerError};
use crate::core::limits::DEFAULT_FAILURE_CHANNEL_CAPACITY;
use crate::core::types::{RecordResult, TrackerResult};
use crate::metrics::{Batch, MetricBuffer, MetricDatum, RecordOutcome};
use crate::monitoring::generate_session_id;
use crate::sink::MetricSink;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SchedulerState {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

impl SchedulerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SchedulerState::Running,
            1 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }
}

/// Delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub batches_sent: u64,
    pub metrics_sent: u64,
    pub send_attempts: u64,
    pub batches_lost: u64,
    pub metrics_lost: u64,
    pub batches_rejected: u64,
    pub metrics_rejected: u64,
    pub failure_events_dropped: u64,
}

#[derive(Default)]
struct Counters {
    batches_sent: AtomicU64,
    metrics_sent: AtomicU64,
    send_attempts: AtomicU64,
    batches_lost: AtomicU64,
    metrics_lost: AtomicU64,
    batches_rejected: AtomicU64,
    metrics_rejected: AtomicU64,
    failure_events_dropped: AtomicU64,
}

/// State shared between the handle and the background task
struct Shared {
    buffer: Arc<MetricBuffer>,
    sink: Arc<dyn MetricSink>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    wake: Notify,
    state: AtomicU8,
    failures_tx: flume::Sender<FlushFailure>,
    last_failure: Mutex<Option<FlushFailure>>,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    async fn flush_pending(&self) {
        let batches = self.buffer.drain_batches();
        self.deliver_all(batches).await;
    }

    async fn flush_final(&self) {
        let batches = self.buffer.close_and_drain();
        let metrics: usize = batches.iter().map(Vec::len).sum();
        debug!(batches = batches.len(), metrics, "Final flush");
        self.deliver_all(batches).await;
    }

    async fn deliver_all(&self, batches: Vec<Batch>) {
        for batch in batches {
            if batch.is_empty() {
                continue;
            }
            self.deliver(batch).await;
        }
    }

    async fn deliver(&self, batch: Batch) {
        let delivery =
            deliver_with_retry(self.sink.as_ref(), &batch, &self.retry, self.sleeper.as_ref())
                .await;
        self.counters
            .send_attempts
            .fetch_add(u64::from(delivery.attempts), Ordering::Relaxed);

        match delivery.outcome {
            Ok(()) => {
                self.counters.batches_sent.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .metrics_sent
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            Err(failure) => self.report_failure(failure),
        }
    }

    fn report_failure(&self, failure: FlushFailure) {
        let metrics = failure.metrics() as u64;
        match &failure {
            FlushFailure::Lost(loss) => {
                self.counters.batches_lost.fetch_add(1, Ordering::Relaxed);
                self.counters.metrics_lost.fetch_add(metrics, Ordering::Relaxed);
                error!(
                    sink = self.sink.name(),
                    reason = ?loss.reason,
                    metrics = loss.metrics,
                    attempts = loss.attempts,
                    "Metric batch lost"
                );
            }
            FlushFailure::Rejected { error, .. } => {
                self.counters.batches_rejected.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .metrics_rejected
                    .fetch_add(metrics, Ordering::Relaxed);
                error!(
                    sink = self.sink.name(),
                    metrics,
                    error = %error,
                    "Metric batch rejected"
                );
            }
        }

        *self.last_failure.lock() = Some(failure.clone());

        if let Err(flume::TrySendError::Full(_)) = self.failures_tx.try_send(failure) {
            self.counters
                .failure_events_dropped
                .fetch_add(1, Ordering::Relaxed);
            warn!("Failure event channel full, dropping event");
        }
    }
}

async fn run(shared: Arc<Shared>, interval: Duration, mut stop_rx: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // Also fires when the handle is dropped without stop()
            _ = &mut stop_rx => break,
            _ = ticker.tick() => shared.flush_pending().await,
            _ = shared.wake.notified() => {
                if shared.buffer.should_flush(std::time::Instant::now()) {
                    shared.flush_pending().await;
                }
            }
        }
    }

    shared.flush_final().await;
}

/// Builder for `FlushScheduler`
pub struct FlushSchedulerBuilder {
    buffer: Arc<MetricBuffer>,
    sink: Arc<dyn MetricSink>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    interval: Option<Duration>,
    failure_channel_capacity: usize,
}

impl FlushSchedulerBuilder {
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Override the cadence (default: the buffer's max age)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_failure_channel_capacity(mut self, capacity: usize) -> Self {
        self.failure_channel_capacity = capacity.max(1);
        self
    }

    /// Spawn the background task
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Configuration` when called outside a tokio runtime
    pub fn start(self) -> TrackerResult<FlushScheduler> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            TrackerError::Configuration(format!("Flush scheduler needs a tokio runtime: {}", e))
        })?;

        let interval = self
            .interval
            .unwrap_or_else(|| self.buffer.max_age())
            .max(Duration::from_millis(1));
        let (failures_tx, failures_rx) = flume::bounded(self.failure_channel_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            buffer: self.buffer,
            sink: self.sink,
            retry: self.retry,
            sleeper: self.sleeper,
            wake: Notify::new(),
            state: AtomicU8::new(SchedulerState::Running as u8),
            failures_tx,
            last_failure: Mutex::new(None),
            counters: Counters::default(),
        });

        let session_id = generate_session_id();
        let span = info_span!(
            "flush_scheduler",
            session_id = %session_id,
            sink = shared.sink.name()
        );
        info!(
            session_id = %session_id,
            sink = shared.sink.name(),
            capacity = shared.buffer.capacity(),
            interval_ms = interval.as_millis() as u64,
            "Flush scheduler started"
        );

        let handle = runtime.spawn(run(Arc::clone(&shared), interval, stop_rx).instrument(span));

        Ok(FlushScheduler {
            shared,
            failures_rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            task: tokio::sync::Mutex::new(Some(handle)),
            session_id,
        })
    }
}

/// Periodic flusher for one buffer/sink pair
pub struct FlushScheduler {
    shared: Arc<Shared>,
    failures_rx: flume::Receiver<FlushFailure>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    session_id: String,
}

impl FlushScheduler {
    /// Start building a scheduler
    pub fn builder(buffer: Arc<MetricBuffer>, sink: Arc<dyn MetricSink>) -> FlushSchedulerBuilder {
        FlushSchedulerBuilder {
            buffer,
            sink,
            retry: RetryPolicy::new(),
            sleeper: Arc::new(TokioSleeper),
            interval: None,
            failure_channel_capacity: DEFAULT_FAILURE_CHANNEL_CAPACITY,
        }
    }

    /// Start a scheduler configured by `config`
    pub fn start(
        buffer: Arc<MetricBuffer>,
        sink: Arc<dyn MetricSink>,
        config: &FlushConfig,
    ) -> TrackerResult<Self> {
        config.validate()?;
        Self::builder(buffer, sink)
            .with_retry_policy(config.retry.clone())
            .with_interval(config.max_age)
            .with_failure_channel_capacity(config.failure_channel_capacity)
            .start()
    }

    /// Record a data point into the shared buffer
    ///
    /// Never waits on the network. Wakes the background task when a batch
    /// was sealed.
    pub fn record(&self, datum: MetricDatum) -> RecordResult<()> {
        if self.shared.state() == SchedulerState::Stopped {
            return Err(RecordError::Closed(SchedulerClosedError));
        }

        match self.shared.buffer.record(datum)? {
            RecordOutcome::Buffered => {}
            RecordOutcome::Sealed => self.shared.wake.notify_one(),
            RecordOutcome::Evicted(loss) => {
                self.shared.report_failure(FlushFailure::Lost(loss));
                self.shared.wake.notify_one();
            }
        }
        Ok(())
    }

    /// Drain and send at the next opportunity, regardless of thresholds
    pub fn request_flush(&self) -> Result<(), SchedulerClosedError> {
        if self.shared.state() == SchedulerState::Stopped || self.shared.buffer.is_closed() {
            return Err(SchedulerClosedError);
        }
        self.shared.buffer.request_flush();
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Stop the cadence and deliver everything recorded so far
    ///
    /// Waits for any in-flight send and for the final drain to reach a
    /// terminal outcome. Calling it again is a no-op.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return;
        };

        self.shared.set_state(SchedulerState::Stopping);
        let stop_tx = self.stop_tx.lock().take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }

        if let Err(e) = handle.await {
            error!(error = %e, "Flush task failed, flushing from caller");
            self.shared.flush_final().await;
        }

        self.shared.set_state(SchedulerState::Stopped);
        let stats = self.stats();
        info!(
            session_id = %self.session_id,
            batches_sent = stats.batches_sent,
            metrics_sent = stats.metrics_sent,
            metrics_lost = stats.metrics_lost,
            "Flush scheduler stopped"
        );
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn buffer(&self) -> &Arc<MetricBuffer> {
        &self.shared.buffer
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Receiver of dropped-batch events
    pub fn failures(&self) -> flume::Receiver<FlushFailure> {
        self.failures_rx.clone()
    }

    /// Most recent dropped-batch event, if any
    pub fn last_failure(&self) -> Option<FlushFailure> {
        self.shared.last_failure.lock().clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.shared.counters;
        SchedulerStats {
            batches_sent: c.batches_sent.load(Ordering::Relaxed),
            metrics_sent: c.metrics_sent.load(Ordering::Relaxed),
            send_attempts: c.send_attempts.load(Ordering::Relaxed),
            batches_lost: c.batches_lost.load(Ordering::Relaxed),
            metrics_lost: c.metrics_lost.load(Ordering::Relaxed),
            batches_rejected: c.batches_rejected.load(Ordering::Relaxed),
            metrics_rejected: c.metrics_rejected.load(Ordering::Relaxed),
            failure_events_dropped: c.failure_events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        // The task still performs the final flush, detached
        if let Some(stop_tx) = self.stop_tx.get_mut().take() {
            if self.shared.state() == SchedulerState::Running {
                warn!(
                    session_id = %self.session_id,
                    "Flush scheduler dropped without stop(); final flush runs detached"
                );
            }
            let _ = stop_tx.send(());
        }
    }
}
