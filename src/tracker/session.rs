/*!
 * Tracker Session
 * Per-trial facade over one buffer and one flush scheduler
 */

use super::environment::{EnvironmentKind, TrialEnvironment};
use crate::core::errors::{FlushFailure, TrackerError};
use crate::core::types::{Step, TrackerResult};
use crate::flush::{FlushConfig, FlushScheduler, SchedulerStats};
use crate::metrics::{BufferStats, MetricDatum, MetricTimestamp};
use crate::sink::{ApiSink, ApiSinkConfig, FileSink, MetricSink};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Tracker settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub flush: FlushConfig,
    /// Surface the last dropped batch as an error from `close()`
    pub raise_on_close: bool,
}

impl TrackerConfig {
    pub fn new(flush: FlushConfig) -> Self {
        Self {
            flush,
            raise_on_close: false,
        }
    }

    pub fn with_raise_on_close(mut self, raise_on_close: bool) -> Self {
        self.raise_on_close = raise_on_close;
        self
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> TrackerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TrackerError::Configuration(format!("Invalid tracker config: {}", e)))?;
        config.flush.validate()?;
        Ok(config)
    }
}

/// Combined snapshot of buffer and delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub buffer: BufferStats,
    pub scheduler: SchedulerStats,
}

/// Metric tracker for one trial component
pub struct Tracker {
    scheduler: Option<FlushScheduler>,
    raise_on_close: bool,
    warned_disabled: AtomicBool,
}

impl Tracker {
    /// Start tracking into `sink`
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Configuration` for invalid settings or when
    /// called outside a tokio runtime
    pub fn start(sink: Arc<dyn MetricSink>, config: TrackerConfig) -> TrackerResult<Self> {
        config.flush.validate()?;
        let buffer = Arc::new(config.flush.build_buffer());
        let scheduler = FlushScheduler::start(buffer, sink, &config.flush)?;

        Ok(Self {
            scheduler: Some(scheduler),
            raise_on_close: config.raise_on_close,
            warned_disabled: AtomicBool::new(false),
        })
    }

    /// Tracker that accepts and discards everything
    pub fn disabled() -> Self {
        Self {
            scheduler: None,
            raise_on_close: false,
            warned_disabled: AtomicBool::new(false),
        }
    }

    /// Pick a sink for the hosting job
    ///
    /// Inside a training job metrics go to the per-process file the job
    /// collects. Processing jobs and plain processes use the API when `api`
    /// is given, and discard metrics otherwise.
    pub fn for_environment(
        environment: Option<&TrialEnvironment>,
        api: Option<ApiSinkConfig>,
        config: TrackerConfig,
    ) -> TrackerResult<Self> {
        let training_job = environment.filter(|env| env.kind == EnvironmentKind::TrainingJob);
        let sink: Arc<dyn MetricSink> = match (training_job, api) {
            (Some(env), _) => {
                let sink = FileSink::in_default_directory();
                info!(
                    kind = ?env.kind,
                    arn = %env.source_arn,
                    path = %sink.path().display(),
                    "Writing metrics to job file"
                );
                Arc::new(sink)
            }
            (None, Some(api)) => Arc::new(ApiSink::new(api)?),
            (None, None) => return Ok(Self::disabled()),
        };
        Self::start(sink, config)
    }

    pub fn is_enabled(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Record one data point
    ///
    /// Without a timestamp the current time is used. Never waits on the
    /// network.
    pub fn record_metric(
        &self,
        name: impl Into<String>,
        value: f64,
        timestamp: Option<MetricTimestamp>,
        step: Option<Step>,
    ) -> TrackerResult<()> {
        let Some(scheduler) = &self.scheduler else {
            if !self.warned_disabled.swap(true, Ordering::AcqRel) {
                warn!("Cannot write metrics in this environment, metrics are discarded");
            }
            return Ok(());
        };

        let mut datum = MetricDatum::new(name, value);
        if let Some(timestamp) = timestamp {
            let at = timestamp.resolve(datum.name())?;
            datum = datum.with_timestamp(at);
        }
        if let Some(step) = step {
            datum = datum.with_step(step);
        }

        scheduler.record(datum)?;
        Ok(())
    }

    /// Send buffered metrics at the next opportunity
    pub fn flush(&self) -> TrackerResult<()> {
        match &self.scheduler {
            Some(scheduler) => Ok(scheduler.request_flush()?),
            None => Ok(()),
        }
    }

    /// Deliver everything recorded so far and stop the session
    ///
    /// # Errors
    ///
    /// With `raise_on_close`, returns the last dropped batch of the session
    /// as `TrackerError::Flush`
    pub async fn close(&self) -> TrackerResult<()> {
        let Some(scheduler) = &self.scheduler else {
            return Ok(());
        };
        scheduler.stop().await;

        if self.raise_on_close {
            if let Some(failure) = scheduler.last_failure() {
                return Err(TrackerError::Flush(failure));
            }
        }
        Ok(())
    }

    /// Receiver of dropped-batch events; `None` when disabled
    pub fn failures(&self) -> Option<flume::Receiver<FlushFailure>> {
        self.scheduler.as_ref().map(FlushScheduler::failures)
    }

    pub fn last_failure(&self) -> Option<FlushFailure> {
        self.scheduler.as_ref().and_then(FlushScheduler::last_failure)
    }

    pub fn stats(&self) -> TrackerStats {
        match &self.scheduler {
            Some(scheduler) => TrackerStats {
                buffer: scheduler.buffer().stats(),
                scheduler: scheduler.stats(),
            },
            None => TrackerStats::default(),
        }
    }
}
