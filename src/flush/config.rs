/*!
 * Flush Configuration
 *
 * Batching bounds, cadence and retry policy for one tracking session.
 */

use super::backoff::RetryPolicy;
use crate::core::errors::TrackerError;
use crate::core::limits::{DEFAULT_BATCH_CAPACITY, DEFAULT_FAILURE_CHANNEL_CAPACITY, DEFAULT_MAX_AGE};
use crate::core::types::TrackerResult;
use crate::metrics::MetricBuffer;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

/// Environment override for batch capacity
pub const CAPACITY_ENV: &str = "TRIAL_METRICS_CAPACITY";
/// Environment override for max age / flush cadence, in milliseconds
pub const FLUSH_INTERVAL_ENV: &str = "TRIAL_METRICS_FLUSH_INTERVAL_MS";
/// Environment override for the retry bound
pub const MAX_RETRIES_ENV: &str = "TRIAL_METRICS_MAX_RETRIES";

/// Buffering and delivery settings
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlushConfig {
    /// Data points per batch (default: 10)
    pub capacity: usize,

    /// Max age of the oldest pending data point, also the flush cadence (default: 1s)
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_age_ms")]
    pub max_age: Duration,

    /// Sealed batches allowed to wait for delivery before the oldest is
    /// evicted (default: unbounded)
    pub max_queued_batches: Option<usize>,

    /// Buffered failure events before new ones are dropped (default: 256)
    pub failure_channel_capacity: usize,

    pub retry: RetryPolicy,
}

impl FlushConfig {
    /// Create default flush configuration
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_BATCH_CAPACITY,
            max_age: DEFAULT_MAX_AGE,
            max_queued_batches: None,
            failure_channel_capacity: DEFAULT_FAILURE_CHANNEL_CAPACITY,
            retry: RetryPolicy::new(),
        }
    }

    /// Small batches and a short cadence for development and tests
    pub fn aggressive() -> Self {
        Self {
            capacity: 5,
            max_age: Duration::from_millis(50),
            retry: RetryPolicy::aggressive(),
            ..Self::new()
        }
    }

    /// Large batches and a long cadence for chatty training loops
    pub fn relaxed() -> Self {
        Self {
            capacity: DEFAULT_BATCH_CAPACITY,
            max_age: Duration::from_secs(10),
            retry: RetryPolicy::relaxed(),
            ..Self::new()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Trade completeness for bounded memory: evict past `limit` sealed batches
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.max_queued_batches = Some(limit);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> TrackerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TrackerError::Configuration(format!("Invalid flush config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRIAL_METRICS_*` environment overrides
    pub fn from_env(mut self) -> TrackerResult<Self> {
        if let Some(capacity) = env_number::<usize>(CAPACITY_ENV)? {
            self.capacity = capacity;
        }
        if let Some(ms) = env_number::<u64>(FLUSH_INTERVAL_ENV)? {
            self.max_age = Duration::from_millis(ms);
        }
        if let Some(retries) = env_number::<u32>(MAX_RETRIES_ENV)? {
            self.retry.max_retries = retries;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.capacity == 0 {
            return Err(TrackerError::Configuration("capacity must be > 0".into()));
        }
        if self.max_age.is_zero() {
            return Err(TrackerError::Configuration("max_age must be > 0".into()));
        }
        if self.max_queued_batches == Some(0) {
            return Err(TrackerError::Configuration(
                "max_queued_batches must be > 0".into(),
            ));
        }
        if self.failure_channel_capacity == 0 {
            return Err(TrackerError::Configuration(
                "failure_channel_capacity must be > 0".into(),
            ));
        }
        self.retry.validate().map_err(TrackerError::Configuration)
    }

    /// Build the buffer these settings describe
    pub fn build_buffer(&self) -> MetricBuffer {
        match self.max_queued_batches {
            Some(limit) => MetricBuffer::with_queue_limit(self.capacity, self.max_age, limit),
            None => MetricBuffer::new(self.capacity, self.max_age),
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> TrackerResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| TrackerError::Configuration(format!("{}={:?} is not a valid number", key, raw))),
        Err(_) => Ok(None),
    }
}
