//! Retry with exponential backoff, non-retryable failures and timeouts.

use super::test_utils::{chunk, engine_with, final_chunk, EventLog};
use parking_lot::Mutex;
use sluice::{BoundaryConfig, BoundaryState, ErrorCode, EventKind, StreamError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn retries_with_backoff_then_fails() {
    let engine = engine_with(|c| {
        c.retry.max_retries = 2;
        c.retry.base_delay_ms = 100;
    });
    let log = EventLog::attach(&engine);
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let seen = attempts.clone();
    engine
        .register(
            "r",
            BoundaryConfig::default().with_transformer(move |_| {
                seen.lock().push(Instant::now());
                Err(StreamError::network("connection reset"))
            }),
        )
        .unwrap();
    engine.start("r").unwrap();

    assert!(!engine.process_chunk(chunk("r", 0, 10)).await);

    let snapshot = engine.boundary("r").unwrap();
    assert_eq!(snapshot.state, BoundaryState::Error);
    assert_eq!(snapshot.retry_count, 2);
    assert!(snapshot.cancelled);
    let err = snapshot.last_error.unwrap();
    assert_eq!(err.code, ErrorCode::NetworkError);
    assert!(err.retryable);

    let attempts = attempts.lock().clone();
    assert_eq!(attempts.len(), 3);
    let first_gap = attempts[1] - attempts[0];
    let second_gap = attempts[2] - attempts[1];
    assert!(first_gap >= Duration::from_millis(100) && first_gap < Duration::from_millis(110));
    assert!(second_gap >= Duration::from_millis(200) && second_gap < Duration::from_millis(210));

    let delays: Vec<u64> = log
        .all()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::Retry { delay_ms, .. } => Some(delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![100, 200]);
    assert_eq!(log.count("error"), 1);

    let metrics = engine.metrics();
    assert_eq!(metrics.retry_attempts, 2);
    assert_eq!(metrics.failed_streams, 1);
    assert_eq!(metrics.active_streams, 0);
    assert!(!metrics.boundaries["r"].success);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_recover() {
    let engine = engine_with(|c| {
        c.retry.max_retries = 3;
        c.retry.base_delay_ms = 100;
    });
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    engine
        .register(
            "r",
            BoundaryConfig::default().with_transformer(move |chunk| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(StreamError::server("upstream 503"));
                }
                Ok(chunk)
            }),
        )
        .unwrap();
    engine.start("r").unwrap();

    let started = Instant::now();
    assert!(engine.process_chunk(final_chunk("r", 0, 10)).await);
    assert!(started.elapsed() >= Duration::from_millis(300));

    let snapshot = engine.boundary("r").unwrap();
    assert_eq!(snapshot.state, BoundaryState::Completed);
    assert_eq!(snapshot.retry_count, 2);
    assert_eq!(engine.metrics().boundaries["r"].retry_count, 2);
}

#[tokio::test]
async fn non_retryable_failure_is_immediate() {
    let engine = engine_with(|c| c.retry.max_retries = 5);
    let log = EventLog::attach(&engine);
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    engine
        .register(
            "r",
            BoundaryConfig::default()
                .with_transformer(|_| Err(StreamError::config("bad template")))
                .on_error(move |id, err| sink.lock().push((id.to_string(), err.code))),
        )
        .unwrap();
    engine.start("r").unwrap();

    assert!(!engine.process_chunk(chunk("r", 0, 1)).await);
    assert_eq!(engine.state("r"), Some(BoundaryState::Error));
    assert_eq!(log.count("retry"), 0);
    assert_eq!(
        *failures.lock(),
        vec![("r".to_string(), ErrorCode::ConfigError)]
    );

    // An errored boundary stops consuming chunks.
    assert!(!engine.process_chunk(chunk("r", 1, 1)).await);
}

#[tokio::test]
async fn checksum_mismatch_fails_boundary() {
    let engine = engine_with(|_| {});
    engine.register("c", BoundaryConfig::default()).unwrap();
    engine.start("c").unwrap();

    assert!(engine.process_chunk(chunk("c", 0, 4).with_checksum()).await);

    let mut tampered = chunk("c", 1, 4).with_checksum();
    tampered.data = bytes::Bytes::from_static(b"evil");
    assert!(!engine.process_chunk(tampered).await);

    let err = engine.boundary("c").unwrap().last_error.unwrap();
    assert_eq!(err.code, ErrorCode::ChecksumError);
    assert_eq!(err.chunk_id.as_deref(), Some("c:1"));
}

#[tokio::test(start_paused = true)]
async fn abort_during_retry_delay_stops_retrying() {
    let engine = engine_with(|c| c.retry.base_delay_ms = 1_000);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    engine
        .register(
            "r",
            BoundaryConfig::default().with_transformer(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StreamError::network("flaky"))
            }),
        )
        .unwrap();
    engine.start("r").unwrap();

    let producer = engine.clone();
    let task = tokio::spawn(async move { producer.process_chunk(chunk("r", 0, 1)).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.abort("r", None).unwrap();

    assert!(!task.await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state("r"), Some(BoundaryState::Aborted));
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_streaming_boundary() {
    let engine = engine_with(|_| {});
    let log = EventLog::attach(&engine);
    engine
        .register(
            "slow",
            BoundaryConfig::default().with_timeout(Duration::from_millis(50)),
        )
        .unwrap();
    engine.start("slow").unwrap();
    let token = engine.cancellation_token("slow").unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    let snapshot = engine.boundary("slow").unwrap();
    assert_eq!(snapshot.state, BoundaryState::Error);
    assert_eq!(snapshot.last_error.unwrap().code, ErrorCode::TimeoutError);
    assert!(token.is_cancelled());
    assert_eq!(engine.active_streams(), 0);
    assert_eq!(log.count("retry"), 0);
    assert!(!engine.process_chunk(chunk("slow", 0, 1)).await);
}

#[tokio::test(start_paused = true)]
async fn timeout_cleared_on_completion() {
    let engine = engine_with(|_| {});
    engine
        .register(
            "quick",
            BoundaryConfig::default().with_timeout(Duration::from_millis(50)),
        )
        .unwrap();
    engine.start("quick").unwrap();
    assert!(engine.process_chunk(final_chunk("quick", 0, 1)).await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.state("quick"), Some(BoundaryState::Completed));
    assert_eq!(engine.metrics().failed_streams, 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_while_paused_fails_on_resume() {
    let engine = engine_with(|_| {});
    let log = EventLog::attach(&engine);
    engine
        .register(
            "held",
            BoundaryConfig::default().with_timeout(Duration::from_millis(50)),
        )
        .unwrap();
    engine.start("held").unwrap();
    engine.pause("held").unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.state("held"), Some(BoundaryState::Paused));
    assert_eq!(log.count("error"), 0);

    engine.resume("held").unwrap();
    let snapshot = engine.boundary("held").unwrap();
    assert_eq!(snapshot.state, BoundaryState::Error);
    assert_eq!(snapshot.last_error.unwrap().code, ErrorCode::TimeoutError);
    assert_eq!(engine.active_streams(), 0);
    assert_eq!(log.count("error"), 1);
    assert_eq!(log.count("retry"), 0);
}

#[tokio::test]
async fn panicking_transformer_fails_boundary() {
    let engine = engine_with(|c| c.retry.max_retries = 3);
    engine
        .register(
            "p",
            BoundaryConfig::default().with_transformer(|_| panic!("template exploded")),
        )
        .unwrap();
    engine.start("p").unwrap();

    assert!(!engine.process_chunk(chunk("p", 0, 1)).await);

    let snapshot = engine.boundary("p").unwrap();
    assert_eq!(snapshot.state, BoundaryState::Error);
    assert_eq!(snapshot.retry_count, 0);
    let err = snapshot.last_error.unwrap();
    assert_eq!(err.code, ErrorCode::UnknownError);
    assert!(err.message.contains("template exploded"));
    assert_eq!(engine.active_streams(), 0);
}
