/*!
 * Flushing
 * Background delivery, retry with backoff, and session configuration
 */

mod backoff;
mod config;
mod retry;
mod scheduler;
mod sleeper;

pub use backoff::{backoff_delay, RetryPolicy};
pub use config::{FlushConfig, CAPACITY_ENV, FLUSH_INTERVAL_ENV, MAX_RETRIES_ENV};
pub use retry::{deliver_with_retry, Delivery};
pub use scheduler::{FlushScheduler, FlushSchedulerBuilder, SchedulerState, SchedulerStats};
pub use sleeper::{RecordingSleeper, SleepFuture, Sleeper, TokioSleeper};
