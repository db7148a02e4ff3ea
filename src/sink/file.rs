/*!
 * File Sink
 * Appends metric records as JSON lines to a per-process file
 *
 * Used when the hosting job collects metrics from disk instead of the API.
 * The file is opened lazily on the first send and appended to.
 */

use super::traits::{MetricSink, SendFuture};
use crate::core::errors::SendError;
use crate::core::limits::METRICS_DIRECTORY_ENV;
use crate::metrics::MetricDatum;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

struct FileState {
    file: Option<File>,
    closed: bool,
}

/// JSON-lines metric sink
pub struct FileSink {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileSink {
    /// Sink writing to an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(FileState {
                file: None,
                closed: false,
            }),
        }
    }

    /// Sink writing to `<TRIAL_METRICS_DIRECTORY or .>/<pid>.json`
    pub fn in_default_directory() -> Self {
        let dir = std::env::var(METRICS_DIRECTORY_ENV).unwrap_or_else(|_| ".".to_string());
        Self::new(Path::new(&dir).join(format!("{}.json", std::process::id())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the file; later sends are rejected
    pub async fn close(&self) -> std::io::Result<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    async fn write_batch(&self, batch: &[MetricDatum]) -> Result<(), SendError> {
        let mut lines = String::new();
        for datum in batch {
            let line = serde_json::to_string(&datum.to_record())
                .map_err(|e| SendError::permanent(format!("Failed to encode metric: {}", e)))?;
            lines.push_str(&line);
            lines.push('\n');
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SendError::permanent("write on a closed metrics file"));
        }

        if state.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(classify_io_error)?;
            debug!(path = %self.path.display(), "Opened metrics file");
            state.file = Some(file);
        }

        if let Some(file) = state.file.as_mut() {
            file.write_all(lines.as_bytes())
                .await
                .map_err(classify_io_error)?;
            file.flush().await.map_err(classify_io_error)?;
        }
        Ok(())
    }
}

fn classify_io_error(err: std::io::Error) -> SendError {
    match err.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            SendError::transient(err.to_string())
        }
        _ => SendError::permanent(err.to_string()),
    }
}

impl MetricSink for FileSink {
    fn send<'a>(&'a self, batch: &'a [MetricDatum]) -> SendFuture<'a> {
        Box::pin(self.write_batch(batch))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
