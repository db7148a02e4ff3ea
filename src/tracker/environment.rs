/*!
 * Trial Environment
 * Detects the managed job hosting this process
 */

use crate::core::errors::TrackerError;
use crate::core::limits::{PROCESSING_JOB_CONFIG_PATH, TRAINING_JOB_ARN_ENV};
use crate::core::types::TrackerResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Kind of job the process runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    TrainingJob,
    ProcessingJob,
}

/// Job hosting the current process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialEnvironment {
    pub kind: EnvironmentKind,
    pub source_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessingJobConfig {
    processing_job_arn: String,
}

impl TrialEnvironment {
    /// Detect the environment from the standard locations
    pub fn load() -> TrackerResult<Option<Self>> {
        Self::load_from(TRAINING_JOB_ARN_ENV, Path::new(PROCESSING_JOB_CONFIG_PATH))
    }

    /// Detect the environment from an explicit env var and config file
    ///
    /// The training job variable wins over the processing job file. Returns
    /// `Ok(None)` when neither is present.
    pub fn load_from(env_key: &str, config_path: &Path) -> TrackerResult<Option<Self>> {
        // Presence alone marks a training job, even with a blank value
        if let Ok(arn) = std::env::var(env_key) {
            debug!(arn = %arn, "Running in a training job");
            return Ok(Some(Self {
                kind: EnvironmentKind::TrainingJob,
                source_arn: arn.trim().to_string(),
            }));
        }

        if !config_path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(config_path)?;
        let config: ProcessingJobConfig = serde_json::from_str(&raw).map_err(|e| {
            TrackerError::Environment(format!("{}: {}", config_path.display(), e))
        })?;
        debug!(arn = %config.processing_job_arn, "Running in a processing job");

        Ok(Some(Self {
            kind: EnvironmentKind::ProcessingJob,
            source_arn: config.processing_job_arn,
        }))
    }

    pub fn is_training_job(&self) -> bool {
        self.kind == EnvironmentKind::TrainingJob
    }
}
