/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected metric datum, caught before it reaches the buffer
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum InvalidMetricError {
    #[error("Metric name must not be empty")]
    #[diagnostic(
        code(metric::empty_name),
        help("Give every metric a non-blank name such as \"loss\" or \"accuracy\".")
    )]
    EmptyName,

    #[error("Metric '{name}' has non-finite value {value}")]
    #[diagnostic(
        code(metric::non_finite_value),
        help("NaN and infinite values cannot be stored by the tracking service.")
    )]
    NonFiniteValue { name: String, value: f64 },

    #[error("Metric '{name}' has invalid timestamp {seconds} (seconds since epoch)")]
    #[diagnostic(
        code(metric::invalid_timestamp),
        help("Pass a finite number of seconds since the Unix epoch, or a datetime.")
    )]
    InvalidTimestamp { name: String, seconds: f64 },
}

/// Use of a scheduler (or its buffer) after it has been stopped
#[derive(Error, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[error("Metric scheduler is closed")]
#[diagnostic(
    code(scheduler::closed),
    help("record and request_flush cannot be called after stop(). Create a new session.")
)]
pub struct SchedulerClosedError;

/// Outcome of a failed `MetricSink::send`
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SendError {
    #[error("Transient send failure: {0}")]
    #[diagnostic(
        code(sink::transient),
        help("Network, timeout or throttling problem. The batch will be retried.")
    )]
    Transient(String),

    #[error("Batch rejected: {reason}")]
    #[diagnostic(
        code(sink::permanent),
        help("The tracking service refused the batch. It will not be retried.")
    )]
    Permanent {
        reason: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rejected: Vec<RejectedMetric>,
    },
}

impl SendError {
    pub fn transient(reason: impl Into<String>) -> Self {
        SendError::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        SendError::Permanent {
            reason: reason.into(),
            rejected: Vec::new(),
        }
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }
}

/// Single item the service refused inside an otherwise delivered batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedMetric {
    pub index: usize,
    pub metric_name: Option<String>,
    pub code: String,
    pub message: String,
}

/// Why a batch was given up on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LossReason {
    /// Transient failures outlasted the retry bound
    RetriesExhausted,
    /// Too many sealed batches waiting; the oldest was evicted
    QueueOverflow,
}

/// Terminal signal that a batch was discarded
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Diagnostic)]
#[error("Lost {metrics} metric(s) after {attempts} attempt(s): {reason:?}")]
#[diagnostic(
    code(flush::metric_loss),
    help("The batch was dropped to keep memory bounded. Check connectivity to the tracking service.")
)]
pub struct MetricLossError {
    pub reason: LossReason,
    pub metrics: usize,
    pub attempts: u32,
    pub last_error: Option<SendError>,
}

/// Failure event reported by the scheduler for one dropped batch
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Diagnostic)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum FlushFailure {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lost(MetricLossError),

    #[error("Dropped {metrics} metric(s): {error}")]
    #[diagnostic(code(flush::rejected))]
    Rejected { metrics: usize, error: SendError },
}

impl FlushFailure {
    /// Number of metrics dropped; a partial rejection counts only the refused items
    pub fn metrics(&self) -> usize {
        match self {
            FlushFailure::Lost(loss) => loss.metrics,
            FlushFailure::Rejected { metrics, .. } => *metrics,
        }
    }
}

/// Errors returned by `record`
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum RecordError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Invalid(#[from] InvalidMetricError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Closed(#[from] SchedulerClosedError),
}

/// Unified tracker error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum TrackerError {
    #[error("Record error: {0}")]
    #[diagnostic(transparent)]
    Record(#[from] RecordError),

    #[error("Flush failure: {0}")]
    #[diagnostic(transparent)]
    Flush(#[from] FlushFailure),

    #[error("Scheduler error: {0}")]
    #[diagnostic(transparent)]
    Closed(#[from] SchedulerClosedError),

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(tracker::configuration_error),
        help("Invalid configuration. Review configuration parameters.")
    )]
    Configuration(String),

    #[error("Environment error: {0}")]
    #[diagnostic(
        code(tracker::environment_error),
        help("The job environment could not be read. Check the job config file.")
    )]
    Environment(String),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(tracker::io_error),
        help("Filesystem or I/O operation failed. Check file permissions and disk space.")
    )]
    Io(String),
}

impl From<InvalidMetricError> for TrackerError {
    fn from(err: InvalidMetricError) -> Self {
        TrackerError::Record(RecordError::Invalid(err))
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Io(err.to_string())
    }
}
