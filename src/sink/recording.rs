/*!
 * Recording Sink
 * In-memory test double that records every batch and plays back scripted failures
 */

use super::traits::{MetricSink, SendFuture};
use crate::core::errors::SendError;
use crate::core::types::SendResult;
use crate::metrics::MetricDatum;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One observed `send` call
#[derive(Debug, Clone)]
pub struct SendCall {
    pub batch: Vec<MetricDatum>,
    pub started: Instant,
    pub finished: Instant,
    pub outcome: SendResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Succeed,
    Transient,
    Permanent,
}

/// Sink that records calls instead of talking to a service
///
/// # Example
///
/// ```ignore
/// // Two throttled attempts, then success
/// let sink = RecordingSink::new().fail_transient(2);
/// ```
pub struct RecordingSink {
    calls: Mutex<Vec<SendCall>>,
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    delay: Option<Duration>,
}

impl RecordingSink {
    /// Sink that accepts every batch
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback: Behavior::Succeed,
            delay: None,
        }
    }

    /// Sink that fails transiently on every call
    pub fn always_transient() -> Self {
        Self {
            fallback: Behavior::Transient,
            ..Self::new()
        }
    }

    /// Sink that rejects every call
    pub fn always_permanent() -> Self {
        Self {
            fallback: Behavior::Permanent,
            ..Self::new()
        }
    }

    /// Queue `count` transient failures ahead of the fallback behavior
    pub fn fail_transient(self, count: usize) -> Self {
        self.script
            .lock()
            .extend(std::iter::repeat(Behavior::Transient).take(count));
        self
    }

    /// Queue `count` permanent failures ahead of the fallback behavior
    pub fn fail_permanent(self, count: usize) -> Self {
        self.script
            .lock()
            .extend(std::iter::repeat(Behavior::Permanent).take(count));
        self
    }

    /// Make every call take `delay` before returning
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Batches that were accepted
    pub fn delivered_batches(&self) -> Vec<Vec<MetricDatum>> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.outcome.is_ok())
            .map(|call| call.batch.clone())
            .collect()
    }

    /// Every accepted data point, in delivery order
    pub fn delivered(&self) -> Vec<MetricDatum> {
        self.delivered_batches().into_iter().flatten().collect()
    }

    fn next_behavior(&self) -> Behavior {
        self.script.lock().pop_front().unwrap_or(self.fallback)
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink for RecordingSink {
    fn send<'a>(&'a self, batch: &'a [MetricDatum]) -> SendFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            let behavior = self.next_behavior();

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let outcome = match behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Transient => Err(SendError::transient("scripted throttling")),
                Behavior::Permanent => Err(SendError::permanent("scripted rejection")),
            };

            self.calls.lock().push(SendCall {
                batch: batch.to_vec(),
                started,
                finished: Instant::now(),
                outcome: outcome.clone(),
            });
            outcome
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
