/*!
 * Metric Buffer
 * Lock-protected accumulation of pending data points with size and age bounds
 *
 * Design: a single mutex covers the pending sequence, the sealed batches and
 * the closed flag, so `record` and every drain are mutually exclusive. A full
 * pending sequence is sealed into a batch before the next item is admitted;
 * sealed batches wait here, in order, until the scheduler drains them.
 */

use super::datum::MetricDatum;
use crate::core::errors::{LossReason, MetricLossError, RecordError, SchedulerClosedError};
use crate::core::limits::{DEFAULT_BATCH_CAPACITY, DEFAULT_MAX_AGE};
use crate::core::types::RecordResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Ordered set of data points drained together for one send
pub type Batch = Vec<MetricDatum>;

/// What `record` did with the data point
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Appended to the pending sequence
    Buffered,
    /// Pending sequence was full and got sealed into a batch first
    Sealed,
    /// Sealed, and the oldest waiting batch was evicted to stay within an
    /// explicit queue limit
    Evicted(MetricLossError),
}

impl RecordOutcome {
    /// Whether a batch is now ready for delivery
    #[inline]
    pub fn sealed(&self) -> bool {
        !matches!(self, RecordOutcome::Buffered)
    }
}

/// Buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub recorded: u64,
    pub implicit_flushes: u64,
    pub evicted_batches: u64,
    pub evicted_metrics: u64,
    pub pending: usize,
    pub sealed_batches: usize,
}

struct BufferState {
    pending: Vec<MetricDatum>,
    /// Admission time of the first pending item
    oldest: Option<Instant>,
    sealed: VecDeque<Batch>,
    closed: bool,
}

/// Metric buffer shared between recorders and the flush scheduler
pub struct MetricBuffer {
    state: Mutex<BufferState>,
    capacity: usize,
    max_age: Duration,
    /// Opt-in bound on sealed batches; `None` never drops anything
    max_queued_batches: Option<usize>,
    force: AtomicBool,
    recorded: AtomicU64,
    implicit_flushes: AtomicU64,
    evicted_batches: AtomicU64,
    evicted_metrics: AtomicU64,
}

impl MetricBuffer {
    /// Create a buffer with the given capacity and max age
    ///
    /// A zero capacity is treated as one. Sealed batches are never evicted,
    /// so nothing recorded is lost while the sink keeps up eventually.
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self::build(capacity, max_age, None)
    }

    /// Create a buffer that keeps at most `max_queued_batches` sealed batches
    ///
    /// Past the limit the oldest sealed batch is evicted and reported as
    /// `LossReason::QueueOverflow`. Only for callers that prefer bounded
    /// memory over delivering everything.
    pub fn with_queue_limit(capacity: usize, max_age: Duration, max_queued_batches: usize) -> Self {
        Self::build(capacity, max_age, Some(max_queued_batches.max(1)))
    }

    fn build(capacity: usize, max_age: Duration, max_queued_batches: Option<usize>) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(BufferState {
                pending: Vec::with_capacity(capacity),
                oldest: None,
                sealed: VecDeque::new(),
                closed: false,
            }),
            capacity,
            max_age,
            max_queued_batches,
            force: AtomicBool::new(false),
            recorded: AtomicU64::new(0),
            implicit_flushes: AtomicU64::new(0),
            evicted_batches: AtomicU64::new(0),
            evicted_metrics: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Admit a data point
    ///
    /// Validation happens before the lock is taken. If the pending sequence
    /// is already at capacity it is sealed into a batch and the new item
    /// starts the next one.
    pub fn record(&self, datum: MetricDatum) -> RecordResult<RecordOutcome> {
        datum.validate()?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(RecordError::Closed(SchedulerClosedError));
        }

        let mut outcome = RecordOutcome::Buffered;
        if state.pending.len() >= self.capacity {
            outcome = self.seal_locked(&mut state);
        }

        if state.pending.is_empty() {
            state.oldest = Some(Instant::now());
        }
        state.pending.push(datum);
        self.recorded.fetch_add(1, Ordering::Relaxed);

        Ok(outcome)
    }

    fn seal_locked(&self, state: &mut BufferState) -> RecordOutcome {
        let batch = std::mem::replace(&mut state.pending, Vec::with_capacity(self.capacity));
        state.oldest = None;
        state.sealed.push_back(batch);
        self.implicit_flushes.fetch_add(1, Ordering::Relaxed);

        let over_limit = self
            .max_queued_batches
            .is_some_and(|limit| state.sealed.len() > limit);
        if over_limit {
            if let Some(evicted) = state.sealed.pop_front() {
                self.evicted_batches.fetch_add(1, Ordering::Relaxed);
                self.evicted_metrics
                    .fetch_add(evicted.len() as u64, Ordering::Relaxed);
                return RecordOutcome::Evicted(MetricLossError {
                    reason: LossReason::QueueOverflow,
                    metrics: evicted.len(),
                    attempts: 0,
                    last_error: None,
                });
            }
        }
        RecordOutcome::Sealed
    }

    /// Check whether a flush is due at `now`
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.force.load(Ordering::Acquire) {
            return true;
        }
        let state = self.state.lock();
        if !state.sealed.is_empty() || state.pending.len() >= self.capacity {
            return true;
        }
        match state.oldest {
            Some(oldest) => now.saturating_duration_since(oldest) >= self.max_age,
            None => false,
        }
    }

    /// Force the next flush regardless of thresholds
    pub fn request_flush(&self) {
        self.force.store(true, Ordering::Release);
    }

    /// Remove everything waiting, as one ordered sequence
    pub fn drain(&self) -> Vec<MetricDatum> {
        self.drain_batches().into_iter().flatten().collect()
    }

    /// Remove everything waiting, keeping batch boundaries
    ///
    /// Sealed batches come first, in sealing order, followed by the pending
    /// sequence if it is non-empty.
    pub fn drain_batches(&self) -> Vec<Batch> {
        let mut state = self.state.lock();
        self.take_locked(&mut state)
    }

    /// Final drain: take everything and refuse further records
    pub fn close_and_drain(&self) -> Vec<Batch> {
        let mut state = self.state.lock();
        state.closed = true;
        self.take_locked(&mut state)
    }

    fn take_locked(&self, state: &mut BufferState) -> Vec<Batch> {
        self.force.store(false, Ordering::Release);

        let mut batches: Vec<Batch> = state.sealed.drain(..).collect();
        if !state.pending.is_empty() {
            batches.push(std::mem::replace(
                &mut state.pending,
                Vec::with_capacity(self.capacity),
            ));
        }
        state.oldest = None;
        batches
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of data points waiting (pending plus sealed)
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.pending.len() + state.sealed.iter().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.state.lock();
        BufferStats {
            recorded: self.recorded.load(Ordering::Relaxed),
            implicit_flushes: self.implicit_flushes.load(Ordering::Relaxed),
            evicted_batches: self.evicted_batches.load(Ordering::Relaxed),
            evicted_metrics: self.evicted_metrics.load(Ordering::Relaxed),
            pending: state.pending.len(),
            sealed_batches: state.sealed.len(),
        }
    }
}

impl Default for MetricBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CAPACITY, DEFAULT_MAX_AGE)
    }
}
