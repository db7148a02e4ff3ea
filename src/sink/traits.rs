/*!
 * Sink Traits
 * Delivery abstraction for metric batches
 */

use crate::core::types::SendResult;
use crate::metrics::MetricDatum;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by sink sends
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = SendResult> + Send + 'a>>;

/// Delivers one ordered batch to the remote system, or fails
///
/// Implementations classify failures: `SendError::Transient` for network,
/// timeout and throttling conditions, `SendError::Permanent` for rejections.
/// Retrying is the caller's job, not the sink's.
pub trait MetricSink: Send + Sync {
    /// Send a batch
    fn send<'a>(&'a self, batch: &'a [MetricDatum]) -> SendFuture<'a>;

    /// Get the name of this sink (for logging)
    fn name(&self) -> &'static str;
}
