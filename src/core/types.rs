/*!
 * Core Types
 * Common types used across the crate
 */

use super::errors::{RecordError, SendError, TrackerError};

/// Metric step (iteration number)
pub type Step = i64;

/// Result of recording a data point
pub type RecordResult<T> = Result<T, RecordError>;

/// Result of a single sink send
pub type SendResult = Result<(), SendError>;

/// Common result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
