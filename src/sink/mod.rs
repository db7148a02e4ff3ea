/*!
 * Metric Sinks
 * Batch delivery to the tracking service, to disk, or to an in-memory recorder
 */

mod api;
mod file;
mod recording;
mod traits;

pub use api::{ApiSink, ApiSinkConfig};
pub use file::FileSink;
pub use recording::{RecordingSink, SendCall};
pub use traits::{MetricSink, SendFuture};
