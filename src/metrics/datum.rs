/*!
 * Metric Data Points
 * Immutable metric values and their wire record shape
 */

use crate::core::errors::InvalidMetricError;
use crate::core::types::Step;
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};

/// One recorded metric value
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDatum {
    name: String,
    value: f64,
    timestamp: OffsetDateTime,
    step: Option<Step>,
}

impl MetricDatum {
    /// Create a data point stamped with the current UTC time
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: OffsetDateTime::now_utc(),
            step: None,
        }
    }

    /// Override the timestamp (normalized to UTC)
    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp.to_offset(UtcOffset::UTC);
        self
    }

    /// Attach an iteration number
    pub fn with_step(mut self, step: Step) -> Self {
        self.step = Some(step);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    #[inline]
    pub fn step(&self) -> Option<Step> {
        self.step
    }

    /// Seconds since the Unix epoch, with sub-second precision
    pub fn epoch_seconds(&self) -> f64 {
        self.timestamp.unix_timestamp_nanos() as f64 / 1_000_000_000.0
    }

    /// Reject data points the tracking service cannot store
    pub fn validate(&self) -> Result<(), InvalidMetricError> {
        if self.name.trim().is_empty() {
            return Err(InvalidMetricError::EmptyName);
        }
        if !self.value.is_finite() {
            return Err(InvalidMetricError::NonFiniteValue {
                name: self.name.clone(),
                value: self.value,
            });
        }
        Ok(())
    }

    /// Wire representation shared by the API and file sinks
    pub fn to_record(&self) -> MetricRecord<'_> {
        MetricRecord {
            metric_name: &self.name,
            value: self.value,
            timestamp: self.epoch_seconds(),
            iteration_number: self.step,
        }
    }
}

/// Serialized form of a data point
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MetricRecord<'a> {
    pub metric_name: &'a str,
    pub value: f64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_number: Option<Step>,
}

/// Caller-supplied timestamp: a datetime in any offset, or epoch seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricTimestamp {
    At(OffsetDateTime),
    EpochSeconds(f64),
}

impl MetricTimestamp {
    /// Convert to a UTC datetime, rejecting non-finite or out-of-range epochs
    pub fn resolve(self, metric_name: &str) -> Result<OffsetDateTime, InvalidMetricError> {
        match self {
            MetricTimestamp::At(at) => Ok(at.to_offset(UtcOffset::UTC)),
            MetricTimestamp::EpochSeconds(seconds) => {
                let invalid = || InvalidMetricError::InvalidTimestamp {
                    name: metric_name.to_string(),
                    seconds,
                };
                if !seconds.is_finite() {
                    return Err(invalid());
                }
                let nanos = (seconds * 1_000_000_000.0).round() as i128;
                OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|_| invalid())
            }
        }
    }
}

impl From<OffsetDateTime> for MetricTimestamp {
    fn from(at: OffsetDateTime) -> Self {
        MetricTimestamp::At(at)
    }
}

impl From<f64> for MetricTimestamp {
    fn from(seconds: f64) -> Self {
        MetricTimestamp::EpochSeconds(seconds)
    }
}
