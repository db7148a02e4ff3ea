/*!
 * Trial Metrics Library
 * Buffered, batched, retrying delivery of trial metrics to a tracking sink
 *
 * Data points are recorded without blocking into a bounded buffer. A
 * background scheduler drains it on a fixed cadence or when a batch fills,
 * sends batches through a `MetricSink` with capped exponential backoff, and
 * performs a final synchronous flush on `stop()`.
 */

pub mod core;
pub mod flush;
pub mod metrics;
pub mod monitoring;
pub mod sink;
pub mod tracker;

// Re-exports
pub use crate::core::errors::*;
pub use crate::core::types::*;
pub use flush::{
    backoff_delay, FlushConfig, FlushScheduler, FlushSchedulerBuilder, RetryPolicy,
    SchedulerState, SchedulerStats,
};
pub use metrics::{BufferStats, MetricBuffer, MetricDatum, MetricTimestamp, RecordOutcome};
pub use monitoring::init_tracing;
pub use sink::{ApiSink, ApiSinkConfig, FileSink, MetricSink, RecordingSink};
pub use tracker::{EnvironmentKind, Tracker, TrackerConfig, TrackerStats, TrialEnvironment};
