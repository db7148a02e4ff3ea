/*!
 * Limits and Constants
 *
 * Centralized location for batching bounds, flush cadence and retry constants.
 * Organized by domain for maintainability and discoverability.
 */

use std::time::Duration;

// =============================================================================
// BUFFER LIMITS
// =============================================================================

/// Default batch capacity (10 data points)
/// Matches the remote BatchPutMetrics per-call limit
pub const DEFAULT_BATCH_CAPACITY: usize = 10;

/// Default maximum age of the oldest pending data point (1s)
/// Also the scheduler cadence; matches the minimum publish interval of the service
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(1);

/// Capacity of the flush failure event channel
pub const DEFAULT_FAILURE_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// RETRY / BACKOFF
// =============================================================================

/// Retries after the first failed attempt (5 attempts total)
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// First backoff delay (100ms)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Backoff ceiling (5s)
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Exponential growth factor per attempt
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound of added jitter, as a fraction of the un-jittered delay
/// Must stay <= multiplier - 1 so successive delays never decrease
pub const DEFAULT_JITTER_RATIO: f64 = 0.5;

// =============================================================================
// SINKS
// =============================================================================

/// HTTP request timeout for the API sink (30s)
pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Target header value for the batch metrics API
pub const BATCH_PUT_METRICS_TARGET: &str = "SageMaker.BatchPutMetrics";

/// Default processing job config location
pub const PROCESSING_JOB_CONFIG_PATH: &str = "/opt/ml/config/processingjobconfig.json";

/// Environment variable carrying the training job ARN
pub const TRAINING_JOB_ARN_ENV: &str = "TRAINING_JOB_ARN";

/// Directory for file-sink output (default: current directory)
pub const METRICS_DIRECTORY_ENV: &str = "TRIAL_METRICS_DIRECTORY";
