/*!
 * API Sink Tests
 * Requests against a local HTTP responder with canned replies
 */

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use trial_metrics::flush::{FlushScheduler, RecordingSleeper, RetryPolicy};
use trial_metrics::{
    ApiSink, ApiSinkConfig, MetricBuffer, MetricDatum, MetricSink, SendError,
};

const ARN: &str = "arn:aws:sagemaker:us-west-2:123456789012:experiment-trial-component/tc";

/// One captured request
struct Captured {
    head: String,
    body: serde_json::Value,
}

/// Serve `replies` in order, one connection each, then return what was received
async fn serve(replies: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Captured>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut captured = Vec::new();
        for (status, body) in replies {
            let (mut stream, _) = listener.accept().await.unwrap();
            captured.push(read_request(&mut stream).await);

            let response = format!(
                "HTTP/1.1 {} Canned\r\nContent-Type: application/x-amz-json-1.1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
        captured
    });

    (url, handle)
}

async fn read_request(stream: &mut TcpStream) -> Captured {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before headers");
        raw.extend_from_slice(&chunk[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
    let content_length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .map(|v| v.trim().parse().unwrap())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before body");
        raw.extend_from_slice(&chunk[..n]);
    }

    let body = serde_json::from_slice(&raw[header_end..header_end + content_length]).unwrap();
    Captured { head, body }
}

fn sink(url: &str) -> ApiSink {
    ApiSink::new(
        ApiSinkConfig::new(url, ARN)
            .with_header("X-Test-Token", "secret")
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

fn batch() -> Vec<MetricDatum> {
    vec![
        MetricDatum::new("loss", 0.25).with_step(3),
        MetricDatum::new("accuracy", 0.75),
    ]
}

#[tokio::test]
async fn test_request_shape() {
    let (url, server) = serve(vec![(200, "{}")]).await;

    sink(&url).send(&batch()).await.unwrap();

    let captured = server.await.unwrap();
    let request = &captured[0];
    assert!(request.head.starts_with("post / http/1.1"));
    assert!(request
        .head
        .contains("x-amz-target: sagemaker.batchputmetrics"));
    assert!(request.head.contains("x-test-token: secret"));

    assert_eq!(request.body["ResourceArn"], ARN);
    let data = request.body["MetricData"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["MetricName"], "loss");
    assert_eq!(data[0]["Value"], 0.25);
    assert_eq!(data[0]["IterationNumber"], 3);
    assert!(data[0]["Timestamp"].as_f64().unwrap() > 1.6e9);
    assert!(data[1].get("IterationNumber").is_none());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (url, server) = serve(vec![(503, "busy"), (429, "slow down")]).await;
    let sink = sink(&url);

    assert!(sink.send(&batch()).await.unwrap_err().is_transient());
    assert!(sink.send(&batch()).await.unwrap_err().is_transient());
    server.await.unwrap();
}

#[tokio::test]
async fn test_client_error_is_permanent() {
    let (url, server) = serve(vec![(400, r#"{"message": "bad arn"}"#)]).await;

    let err = sink(&url).send(&batch()).await.unwrap_err();
    assert!(matches!(err, SendError::Permanent { .. }));
    server.await.unwrap();
}

#[tokio::test]
async fn test_partial_rejection_lists_metrics() {
    let (url, server) = serve(vec![(
        200,
        r#"{"Errors": [{"Code": "METRIC_LIMIT_EXCEEDED", "Message": "too many", "MetricIndex": 1}]}"#,
    )])
    .await;

    match sink(&url).send(&batch()).await {
        Err(SendError::Permanent { rejected, .. }) => {
            assert_eq!(rejected.len(), 1);
            assert_eq!(rejected[0].index, 1);
            assert_eq!(rejected[0].metric_name.as_deref(), Some("accuracy"));
            assert_eq!(rejected[0].code, "METRIC_LIMIT_EXCEEDED");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    drop(listener);

    let err = sink(&url).send(&batch()).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_scheduler_retries_through_throttling() {
    let (url, server) = serve(vec![(500, "oops"), (429, "slow"), (200, "")]).await;
    let sink: Arc<dyn MetricSink> = Arc::new(sink(&url));

    let scheduler = FlushScheduler::builder(Arc::new(MetricBuffer::default()), sink)
        .with_retry_policy(RetryPolicy::new())
        .with_sleeper(Arc::new(RecordingSleeper::new()))
        .start()
        .unwrap();
    scheduler.record(MetricDatum::new("loss", 0.1)).unwrap();
    scheduler.stop().await;

    let captured = server.await.unwrap();
    assert_eq!(captured.len(), 3);
    assert!(captured.iter().all(|c| c.body == captured[0].body));

    let stats = scheduler.stats();
    assert_eq!(stats.send_attempts, 3);
    assert_eq!(stats.metrics_sent, 1);
}

#[tokio::test]
async fn test_scheduler_counts_only_rejected_entries() {
    let (url, server) = serve(vec![(
        200,
        r#"{"Errors": [{"Code": "VALIDATION_ERROR", "Message": "bad value", "MetricIndex": 1}]}"#,
    )])
    .await;
    let sink: Arc<dyn MetricSink> = Arc::new(sink(&url));

    let scheduler = FlushScheduler::builder(Arc::new(MetricBuffer::default()), sink)
        .with_retry_policy(RetryPolicy::new())
        .with_sleeper(Arc::new(RecordingSleeper::new()))
        .start()
        .unwrap();
    for datum in batch() {
        scheduler.record(datum).unwrap();
    }
    scheduler.stop().await;

    assert_eq!(server.await.unwrap().len(), 1);
    let stats = scheduler.stats();
    assert_eq!(stats.send_attempts, 1);
    assert_eq!(stats.batches_rejected, 1);
    assert_eq!(stats.metrics_rejected, 1);
    assert_eq!(scheduler.last_failure().map(|f| f.metrics()), Some(1));
}
