/*!
 * Metrics
 * Data points and the bounded buffer that batches them
 */

mod buffer;
mod datum;

pub use buffer::{Batch, BufferStats, MetricBuffer, RecordOutcome};
pub use datum::{MetricDatum, MetricRecord, MetricTimestamp};
