/*!
 * Flush Scheduler Tests
 * Cadence, final flush, failure reporting and concurrent recording
 */

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trial_metrics::flush::{FlushScheduler, RecordingSleeper, RetryPolicy, SchedulerState};
use trial_metrics::{FlushConfig, FlushFailure, LossReason, MetricBuffer, MetricDatum, RecordingSink};

fn start(buffer: MetricBuffer, sink: &Arc<RecordingSink>, retry: RetryPolicy) -> FlushScheduler {
    FlushScheduler::builder(Arc::new(buffer), sink.clone())
        .with_retry_policy(retry)
        .with_sleeper(Arc::new(RecordingSleeper::new()))
        .start()
        .unwrap()
}

fn values(sink: &RecordingSink) -> Vec<f64> {
    sink.delivered().iter().map(MetricDatum::value).collect()
}

#[tokio::test]
async fn test_n_records_then_stop_delivers_exactly_n() {
    for n in [0usize, 1, 9, 10, 11, 137] {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = start(
            MetricBuffer::new(10, Duration::from_secs(60)),
            &sink,
            RetryPolicy::new(),
        );

        for i in 0..n {
            scheduler.record(MetricDatum::new("loss", i as f64)).unwrap();
        }
        scheduler.stop().await;

        assert_eq!(values(&sink), (0..n).map(|i| i as f64).collect::<Vec<_>>());
        assert!(sink.calls().iter().all(|call| call.batch.len() <= 10));
    }
}

#[tokio::test]
async fn test_slow_sink_loses_nothing() {
    // Recorder far ahead of the sink: hundreds of sealed batches wait at once
    let sink = Arc::new(RecordingSink::new().with_delay(Duration::from_millis(2)));
    let scheduler = start(
        MetricBuffer::new(10, Duration::from_secs(60)),
        &sink,
        RetryPolicy::new(),
    );

    let n = 2_000;
    for i in 0..n {
        scheduler.record(MetricDatum::new("loss", i as f64)).unwrap();
    }
    scheduler.stop().await;

    assert_eq!(values(&sink), (0..n).map(|i| i as f64).collect::<Vec<_>>());
    let stats = scheduler.stats();
    assert_eq!(stats.metrics_sent, n as u64);
    assert_eq!(stats.metrics_lost, 0);
    assert!(scheduler.last_failure().is_none());
}

#[tokio::test]
async fn test_max_age_triggers_timed_flush() {
    let sink = Arc::new(RecordingSink::new());
    let scheduler = start(
        MetricBuffer::new(10, Duration::from_millis(50)),
        &sink,
        RetryPolicy::new(),
    );

    scheduler.record(MetricDatum::new("loss", 1.0)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.call_count() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(values(&sink), vec![1.0]);
    assert_eq!(scheduler.state(), SchedulerState::Running);

    scheduler.stop().await;
    assert_eq!(sink.call_count(), 1);
}

#[tokio::test]
async fn test_request_flush_skips_cadence() {
    let sink = Arc::new(RecordingSink::new());
    let scheduler = start(
        MetricBuffer::new(10, Duration::from_secs(3600)),
        &sink,
        RetryPolicy::new(),
    );

    scheduler.record(MetricDatum::new("acc", 0.9)).unwrap();
    scheduler.request_flush().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.call_count() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(values(&sink), vec![0.9]);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_send() {
    let sink = Arc::new(RecordingSink::new().with_delay(Duration::from_millis(200)));
    let scheduler = start(
        MetricBuffer::new(10, Duration::from_secs(3600)),
        &sink,
        RetryPolicy::new(),
    );

    scheduler.record(MetricDatum::new("loss", 1.0)).unwrap();
    scheduler.request_flush().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.record(MetricDatum::new("loss", 2.0)).unwrap();

    scheduler.stop().await;
    let stopped_at = Instant::now();

    assert_eq!(values(&sink), vec![1.0, 2.0]);
    assert!(sink.calls().iter().all(|call| call.finished <= stopped_at));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_transient_failures_are_retried_in_background() {
    let sink = Arc::new(RecordingSink::new().fail_transient(3));
    let scheduler = start(
        MetricBuffer::new(10, Duration::from_secs(60)),
        &sink,
        RetryPolicy::new(),
    );

    scheduler.record(MetricDatum::new("loss", 1.0)).unwrap();
    scheduler.stop().await;

    assert_eq!(sink.call_count(), 4);
    assert_eq!(values(&sink), vec![1.0]);
    let stats = scheduler.stats();
    assert_eq!(stats.send_attempts, 4);
    assert_eq!(stats.batches_sent, 1);
    assert!(scheduler.last_failure().is_none());
}

#[tokio::test]
async fn test_exhausted_batch_reported_once_and_scheduler_keeps_running() {
    let sink = Arc::new(RecordingSink::always_transient());
    let scheduler = start(
        MetricBuffer::new(10, Duration::from_secs(3600)),
        &sink,
        RetryPolicy::new().with_max_retries(2),
    );
    let failures = scheduler.failures();

    scheduler.record(MetricDatum::new("loss", 1.0)).unwrap();
    scheduler.request_flush().unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv_async())
        .await
        .expect("loss event")
        .unwrap();
    match failure {
        FlushFailure::Lost(loss) => {
            assert_eq!(loss.reason, LossReason::RetriesExhausted);
            assert_eq!(loss.metrics, 1);
            assert_eq!(loss.attempts, 3);
        }
        other => panic!("expected loss, got {:?}", other),
    }
    assert!(failures.try_recv().is_err());
    assert_eq!(sink.call_count(), 3);

    // Still accepting and delivering after a loss
    assert_eq!(scheduler.state(), SchedulerState::Running);
    scheduler.record(MetricDatum::new("loss", 2.0)).unwrap();
    scheduler.stop().await;

    assert_eq!(sink.call_count(), 6);
    assert_eq!(failures.len(), 1);
    assert_eq!(scheduler.stats().metrics_lost, 2);
}

#[tokio::test]
async fn test_permanent_rejection_not_retried() {
    let sink = Arc::new(RecordingSink::always_permanent());
    let scheduler = start(
        MetricBuffer::new(10, Duration::from_secs(60)),
        &sink,
        RetryPolicy::new(),
    );

    scheduler.record(MetricDatum::new("loss", 1.0)).unwrap();
    scheduler.stop().await;

    assert_eq!(sink.call_count(), 1);
    assert!(matches!(
        scheduler.last_failure(),
        Some(FlushFailure::Rejected { metrics: 1, .. })
    ));
    assert_eq!(scheduler.stats().batches_rejected, 1);
}

#[tokio::test]
async fn test_queue_overflow_reported_as_loss() {
    // Sink slow enough that sealed batches pile up
    let sink = Arc::new(RecordingSink::new().with_delay(Duration::from_millis(300)));
    let scheduler = start(
        MetricBuffer::with_queue_limit(1, Duration::from_secs(3600), 1),
        &sink,
        RetryPolicy::new(),
    );
    let failures = scheduler.failures();

    for i in 0..6 {
        scheduler.record(MetricDatum::new("m", i as f64)).unwrap();
    }
    scheduler.stop().await;

    let stats = scheduler.stats();
    let lost: usize = failures.drain().map(|f| f.metrics()).sum();
    assert_eq!(lost as u64, stats.metrics_lost);
    assert_eq!(stats.metrics_sent + stats.metrics_lost, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_recorders() {
    let sink = Arc::new(RecordingSink::new());
    let scheduler = Arc::new(
        FlushScheduler::start(
            Arc::new(MetricBuffer::with_queue_limit(10, Duration::from_millis(20), 1000)),
            sink.clone(),
            &FlushConfig::new()
                .with_capacity(10)
                .with_max_age(Duration::from_millis(20)),
        )
        .unwrap(),
    );

    let recorders: Vec<_> = (0..4)
        .map(|t| {
            let scheduler = Arc::clone(&scheduler);
            tokio::task::spawn_blocking(move || {
                for i in 0..250 {
                    scheduler
                        .record(MetricDatum::new(format!("worker{}", t), i as f64))
                        .unwrap();
                }
            })
        })
        .collect();
    for recorder in recorders {
        recorder.await.unwrap();
    }
    scheduler.stop().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1000);
    for t in 0..4 {
        let name = format!("worker{}", t);
        let values: Vec<f64> = delivered
            .iter()
            .filter(|d| d.name() == name)
            .map(MetricDatum::value)
            .collect();
        assert_eq!(values, (0..250).map(|i| i as f64).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_independent_sessions() {
    let sink_a = Arc::new(RecordingSink::new());
    let sink_b = Arc::new(RecordingSink::new());
    let a = start(MetricBuffer::default(), &sink_a, RetryPolicy::new());
    let b = start(MetricBuffer::default(), &sink_b, RetryPolicy::new());
    assert_ne!(a.session_id(), b.session_id());

    a.record(MetricDatum::new("a", 1.0)).unwrap();
    b.record(MetricDatum::new("b", 2.0)).unwrap();
    a.stop().await;

    assert!(b.record(MetricDatum::new("b", 3.0)).is_ok());
    b.stop().await;

    assert_eq!(values(&sink_a), vec![1.0]);
    assert_eq!(values(&sink_b), vec![2.0, 3.0]);
}
