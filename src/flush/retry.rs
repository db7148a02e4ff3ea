/*!
 * Batch Delivery with Retry
 *
 * Sends one batch, retrying transient failures with backoff until the
 * policy's bound. Permanent failures are never retried.
 */

use super::backoff::{backoff_delay, RetryPolicy};
use super::sleeper::Sleeper;
use crate::core::errors::{FlushFailure, LossReason, MetricLossError, SendError};
use crate::metrics::MetricDatum;
use crate::sink::MetricSink;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of delivering one batch
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Send calls made for this batch
    pub attempts: u32,
    pub outcome: Result<(), FlushFailure>,
}

impl Delivery {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Deliver `batch`, retrying transient failures per `policy`
///
/// # Returns
///
/// - `Ok(())` once any attempt succeeds
/// - `FlushFailure::Rejected` on the first permanent failure
/// - `FlushFailure::Lost` (retries exhausted) after `policy.max_attempts()` transient failures
pub async fn deliver_with_retry(
    sink: &dyn MetricSink,
    batch: &[MetricDatum],
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Delivery {
    let mut attempts = 0u32;
    let mut previous_delay = Duration::ZERO;

    loop {
        attempts = attempts.saturating_add(1);

        match sink.send(batch).await {
            Ok(()) => {
                debug!(
                    sink = sink.name(),
                    batch_size = batch.len(),
                    attempts,
                    "Batch delivered"
                );
                return Delivery {
                    attempts,
                    outcome: Ok(()),
                };
            }
            Err(error @ SendError::Permanent { .. }) => {
                return Delivery {
                    attempts,
                    outcome: Err(FlushFailure::Rejected {
                        metrics: rejected_count(&error, batch.len()),
                        error,
                    }),
                };
            }
            Err(error) => {
                if attempts >= policy.max_attempts() {
                    return Delivery {
                        attempts,
                        outcome: Err(FlushFailure::Lost(MetricLossError {
                            reason: LossReason::RetriesExhausted,
                            metrics: batch.len(),
                            attempts,
                            last_error: Some(error),
                        })),
                    };
                }

                // Backoff must not shrink even if the policy was built by hand
                let delay = backoff_delay(attempts, policy, policy.sample_jitter()).max(previous_delay);
                previous_delay = delay;

                warn!(
                    sink = sink.name(),
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient send failure, retrying"
                );
                sleeper.sleep(delay).await;
            }
        }
    }
}

/// Metrics dropped by a permanent error; per-item rejections only count their items
fn rejected_count(error: &SendError, batch_len: usize) -> usize {
    match error {
        SendError::Permanent { rejected, .. } if !rejected.is_empty() => rejected.len().min(batch_len),
        _ => batch_len,
    }
}
