/*!
 * Retry Backoff
 *
 * Exponential backoff with bounded multiplicative jitter, as a pure function
 * of (attempt, policy, jitter sample) so it can be tested without sleeping.
 *
 * ## Delay Formula
 *
 * `min(max_delay, base_delay * multiplier^(attempt - 1) * (1 + jitter_ratio * jitter))`
 *
 * With `jitter_ratio <= multiplier - 1` the sequence of delays never
 * decreases, whatever jitter samples are drawn.
 */

use crate::core::limits::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY, DEFAULT_JITTER_RATIO, DEFAULT_MAX_DELAY,
    DEFAULT_MAX_RETRIES,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

/// Retry policy for transient send failures
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "base_delay_ms")]
    pub base_delay: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms")]
    pub max_delay: Duration,

    pub multiplier: f64,

    /// Jitter adds up to this fraction of the un-jittered delay
    pub jitter_ratio: f64,

    /// Draw jitter samples; when false every sample is 0
    pub jitter: bool,
}

impl RetryPolicy {
    /// Default policy: 4 retries, 100ms doubling to at most 5s, up to 50% jitter
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            jitter: true,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::new()
        }
    }

    /// Short delays for tests and development
    pub fn aggressive() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            ..Self::new()
        }
    }

    /// Patient policy for flaky networks
    pub fn relaxed() -> Self {
        Self {
            max_retries: 8,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            ..Self::new()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Total send attempts allowed for one batch
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Draw a jitter sample in [0, 1)
    pub fn sample_jitter(&self) -> f64 {
        if self.jitter {
            rand::random::<f64>()
        } else {
            0.0
        }
    }

    /// Check the invariants the delay sequence relies on
    pub fn validate(&self) -> Result<(), String> {
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if !(self.jitter_ratio.is_finite() && self.jitter_ratio >= 0.0) {
            return Err(format!("jitter_ratio must be >= 0.0, got {}", self.jitter_ratio));
        }
        if self.jitter_ratio > self.multiplier - 1.0 {
            return Err(format!(
                "jitter_ratio {} exceeds multiplier - 1 ({}); delays could decrease",
                self.jitter_ratio,
                self.multiplier - 1.0
            ));
        }
        if self.base_delay > self.max_delay {
            return Err("base_delay must not exceed max_delay".to_string());
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay before retry number `attempt` (1-based)
///
/// `jitter` is clamped to [0, 1]. Attempt 0 has no delay.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy, jitter: f64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let jitter = if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let secs = policy.base_delay.as_secs_f64()
        * policy.multiplier.powi(exponent)
        * (1.0 + policy.jitter_ratio * jitter);

    let cap = policy.max_delay.as_secs_f64();
    if !secs.is_finite() || secs >= cap {
        policy.max_delay
    } else {
        Duration::from_secs_f64(secs.max(0.0))
    }
}
