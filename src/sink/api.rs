/*!
 * API Sink
 * Delivers batches to the tracking service's BatchPutMetrics endpoint over HTTP
 *
 * Request signing is not done here: callers pass whatever static headers
 * their endpoint needs (for example a proxy token).
 */

use super::traits::{MetricSink, SendFuture};
use crate::core::errors::{RejectedMetric, SendError, TrackerError};
use crate::core::limits::{API_REQUEST_TIMEOUT, BATCH_PUT_METRICS_TARGET};
use crate::core::types::{SendResult, TrackerResult};
use crate::metrics::{MetricDatum, MetricRecord};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for the API sink
#[derive(Debug, Clone)]
pub struct ApiSinkConfig {
    /// Full URL of the service endpoint
    pub endpoint: String,
    /// Trial component the metrics belong to
    pub resource_arn: String,
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ApiSinkConfig {
    pub fn new(endpoint: impl Into<String>, resource_arn: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            resource_arn: resource_arn.into(),
            headers: Vec::new(),
            timeout: API_REQUEST_TIMEOUT,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchPutMetricsRequest<'a> {
    resource_arn: &'a str,
    metric_data: Vec<MetricRecord<'a>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BatchPutMetricsResponse {
    #[serde(default)]
    errors: Vec<BatchPutMetricsError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BatchPutMetricsError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    metric_index: usize,
}

/// HTTP sink for the batch metrics API
pub struct ApiSink {
    client: reqwest::Client,
    config: ApiSinkConfig,
}

impl ApiSink {
    pub fn new(config: ApiSinkConfig) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("trial-metrics/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiSinkConfig {
        &self.config
    }

    async fn put_metrics(&self, batch: &[MetricDatum]) -> SendResult {
        let body = BatchPutMetricsRequest {
            resource_arn: &self.config.resource_arn,
            metric_data: batch.iter().map(MetricDatum::to_record).collect(),
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("X-Amz-Target", BATCH_PUT_METRICS_TARGET)
            .header("Content-Type", "application/x-amz-json-1.1")
            .json(&body);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport_error)?;

        debug!(
            status = status.as_u16(),
            batch_size = batch.len(),
            "BatchPutMetrics response"
        );
        classify_response(status, &text, batch)
    }
}

fn classify_transport_error(err: reqwest::Error) -> SendError {
    if err.is_builder() {
        SendError::permanent(format!("Invalid request: {}", err))
    } else {
        SendError::transient(format!("Network request failed: {}", err))
    }
}

/// Map an HTTP status and body to a send outcome
pub(crate) fn classify_response(status: StatusCode, body: &str, batch: &[MetricDatum]) -> SendResult {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(SendError::transient(format!("HTTP {}: {}", status.as_u16(), body)));
    }
    if !status.is_success() {
        return Err(SendError::permanent(format!("HTTP {}: {}", status.as_u16(), body)));
    }

    let parsed: BatchPutMetricsResponse = if body.trim().is_empty() {
        BatchPutMetricsResponse::default()
    } else {
        match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                // 2xx: the batch is accepted
                warn!(error = %e, "Unparseable BatchPutMetrics response body");
                BatchPutMetricsResponse::default()
            }
        }
    };

    if parsed.errors.is_empty() {
        return Ok(());
    }

    let rejected: Vec<RejectedMetric> = parsed
        .errors
        .into_iter()
        .map(|e| RejectedMetric {
            index: e.metric_index,
            metric_name: batch.get(e.metric_index).map(|d| d.name().to_string()),
            code: e.code,
            message: e.message,
        })
        .collect();

    Err(SendError::Permanent {
        reason: format!("{} metric(s) rejected by the service", rejected.len()),
        rejected,
    })
}

impl MetricSink for ApiSink {
    fn send<'a>(&'a self, batch: &'a [MetricDatum]) -> SendFuture<'a> {
        Box::pin(self.put_metrics(batch))
    }

    fn name(&self) -> &'static str {
        "api"
    }
}
