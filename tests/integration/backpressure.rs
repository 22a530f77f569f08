//! Buffer watermark handling for each backpressure strategy.

use super::test_utils::{chunk, engine_with, final_chunk, EventLog};
use sluice::{BackpressureStrategy, BoundaryConfig, BoundaryState, ErrorCode, EventKind};
use std::time::Duration;

fn streaming_engine(
    strategy: BackpressureStrategy,
    capacity: usize,
    high_water_mark: usize,
) -> sluice::StreamEngine {
    let engine = engine_with(|c| {
        c.backpressure = strategy;
        c.buffer.capacity = capacity;
        c.buffer.high_water_mark = high_water_mark;
        c.buffer.max_capacity = capacity.max(4);
    });
    engine.register("s", BoundaryConfig::default()).unwrap();
    engine.start("s").unwrap();
    engine
}

#[tokio::test]
async fn drop_strategy_rejects_chunk_over_watermark() {
    let engine = streaming_engine(BackpressureStrategy::Drop, 2, 15);
    let log = EventLog::attach(&engine);

    assert!(engine.process_chunk(chunk("s", 0, 10)).await);
    assert!(!engine.buffer_stats().backpressure);
    assert!(engine.process_chunk(chunk("s", 1, 10)).await);
    assert!(engine.buffer_stats().backpressure);

    assert!(!engine.process_chunk(chunk("s", 2, 5)).await);
    let stats = engine.buffer_stats();
    assert_eq!(stats.occupied_bytes, 20);
    assert_eq!(stats.len, 2);
    assert_eq!(engine.boundary("s").unwrap().bytes_received, 20);
    assert_eq!(engine.state("s"), Some(BoundaryState::Streaming));
    assert_eq!(log.count("backpressure"), 1);
    assert_eq!(engine.metrics().backpressure_events, 1);
}

#[tokio::test]
async fn error_strategy_fails_boundary() {
    let engine = streaming_engine(BackpressureStrategy::Error, 4, 10);
    assert!(engine.process_chunk(chunk("s", 0, 10)).await);
    assert!(!engine.process_chunk(chunk("s", 1, 1)).await);

    let snapshot = engine.boundary("s").unwrap();
    assert_eq!(snapshot.state, BoundaryState::Error);
    assert_eq!(snapshot.retry_count, 0);
    let err = snapshot.last_error.unwrap();
    assert_eq!(err.code, ErrorCode::BufferOverflow);
    assert_eq!(err.boundary_id.as_deref(), Some("s"));
    assert_eq!(err.chunk_id.as_deref(), Some("s:1"));
    // Buffered output survives the failure.
    assert_eq!(engine.deliver_chunks("s").len(), 1);
}

#[tokio::test]
async fn full_buffer_is_fatal_unless_dropping() {
    let engine = streaming_engine(BackpressureStrategy::Pause, 1, 1_000);
    assert!(engine.process_chunk(chunk("s", 0, 1)).await);
    assert!(!engine.process_chunk(chunk("s", 1, 1)).await);
    let err = engine.boundary("s").unwrap().last_error.unwrap();
    assert_eq!(err.code, ErrorCode::BufferOverflow);

    let engine = streaming_engine(BackpressureStrategy::Drop, 1, 1_000);
    assert!(engine.process_chunk(chunk("s", 0, 1)).await);
    assert!(!engine.process_chunk(chunk("s", 1, 1)).await);
    assert_eq!(engine.state("s"), Some(BoundaryState::Streaming));
}

#[tokio::test(start_paused = true)]
async fn pause_strategy_waits_for_delivery() {
    let engine = streaming_engine(BackpressureStrategy::Pause, 4, 10);
    assert!(engine.process_chunk(chunk("s", 0, 10)).await);

    let producer = engine.clone();
    let blocked = tokio::spawn(async move { producer.process_chunk(chunk("s", 1, 4)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!blocked.is_finished());
    assert_eq!(engine.buffer_stats().len, 1);

    let delivered = engine.deliver_chunks("s");
    assert_eq!(delivered.len(), 1);
    assert!(blocked.await.unwrap());

    let remaining = engine.deliver_chunks("s");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].sequence, 1);
    assert_eq!(engine.boundary("s").unwrap().bytes_delivered, 14);
}

#[tokio::test(start_paused = true)]
async fn pause_wait_ends_when_boundary_aborted() {
    let engine = streaming_engine(BackpressureStrategy::Pause, 4, 10);
    assert!(engine.process_chunk(chunk("s", 0, 10)).await);

    let producer = engine.clone();
    let blocked = tokio::spawn(async move { producer.process_chunk(chunk("s", 1, 4)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    engine.abort("s", Some("client went away")).unwrap();
    assert!(!blocked.await.unwrap());
    assert_eq!(engine.buffer_stats().len, 0);
    assert_eq!(engine.buffer_stats().occupied_bytes, 0);
}

#[tokio::test(start_paused = true)]
async fn waiting_chunk_is_not_admitted_after_reset_and_restart() {
    let engine = streaming_engine(BackpressureStrategy::Pause, 4, 10);
    assert!(engine.process_chunk(chunk("s", 0, 10)).await);

    let producer = engine.clone();
    let blocked = tokio::spawn(async move { producer.process_chunk(chunk("s", 1, 4)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!blocked.is_finished());

    engine.reset("s").unwrap();
    engine.start("s").unwrap();
    assert_eq!(engine.state("s"), Some(BoundaryState::Streaming));

    assert!(!blocked.await.unwrap());
    assert_eq!(engine.buffer_stats().len, 0);
    assert_eq!(engine.boundary("s").unwrap().chunk_count, 0);
}

#[tokio::test(start_paused = true)]
async fn expand_strategy_grows_then_pauses_at_ceiling() {
    let engine = engine_with(|c| {
        c.backpressure = BackpressureStrategy::Expand;
        c.buffer.capacity = 2;
        c.buffer.high_water_mark = 10;
        c.buffer.max_capacity = 4;
    });
    engine.register("s", BoundaryConfig::default()).unwrap();
    engine.start("s").unwrap();

    assert!(engine.process_chunk(chunk("s", 0, 10)).await);
    assert!(engine.process_chunk(chunk("s", 1, 5)).await);
    let stats = engine.buffer_stats();
    assert_eq!(stats.capacity, 4);
    assert_eq!(stats.high_water_mark, 20);

    assert!(engine.process_chunk(chunk("s", 2, 5)).await);
    assert!(engine.buffer_stats().backpressure);

    let producer = engine.clone();
    let blocked = tokio::spawn(async move { producer.process_chunk(chunk("s", 3, 5)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!blocked.is_finished());
    assert_eq!(engine.buffer_stats().capacity, 4);

    engine.deliver_chunks("s");
    assert!(blocked.await.unwrap());
    assert_eq!(engine.metrics().backpressure_events, 2);
}

#[tokio::test]
async fn backpressure_event_carries_buffer_figures() {
    let engine = streaming_engine(BackpressureStrategy::Drop, 4, 8);
    let log = EventLog::attach(&engine);
    assert!(engine.process_chunk(chunk("s", 0, 8)).await);
    assert!(!engine.process_chunk(chunk("s", 1, 1)).await);

    let event = log
        .all()
        .into_iter()
        .find(|e| e.event_type() == "backpressure")
        .unwrap();
    match event.kind {
        EventKind::Backpressure {
            occupied_bytes,
            high_water_mark,
            utilization,
            strategy,
        } => {
            assert_eq!(occupied_bytes, 8);
            assert_eq!(high_water_mark, 8);
            assert_eq!(utilization, 0.25);
            assert_eq!(strategy, BackpressureStrategy::Drop);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn delivery_is_per_boundary_and_fifo() {
    let engine = engine_with(|_| {});
    for id in ["x", "y"] {
        engine.register(id, BoundaryConfig::default()).unwrap();
        engine.start(id).unwrap();
    }
    assert!(engine.process_chunk(chunk("x", 0, 1)).await);
    assert!(engine.process_chunk(chunk("y", 0, 2)).await);
    assert!(engine.process_chunk(chunk("x", 1, 3)).await);
    assert!(engine.process_chunk(final_chunk("y", 1, 4)).await);

    let x: Vec<u64> = engine.deliver_chunks("x").iter().map(|c| c.sequence).collect();
    assert_eq!(x, vec![0, 1]);
    assert_eq!(engine.buffer_stats().len, 2);
    assert_eq!(engine.buffer_stats().occupied_bytes, 6);
    assert!(engine.deliver_chunks("x").is_empty());

    // Completed boundaries keep their output until delivered.
    assert_eq!(engine.deliver_chunks("y").len(), 2);
    assert_eq!(engine.buffer_stats().occupied_bytes, 0);
}
