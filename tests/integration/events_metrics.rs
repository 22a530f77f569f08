//! Event stream contents, callbacks and metrics snapshots.

use super::test_utils::{chunk, engine_with, final_chunk, EventLog};
use parking_lot::Mutex;
use sluice::{BoundaryConfig, BoundaryState, EventKind, Priority, StreamError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn completed_boundary_event_sequence() {
    let engine = engine_with(|_| {});
    let log = EventLog::attach(&engine);
    engine.register("a", BoundaryConfig::default()).unwrap();
    engine.start("a").unwrap();
    assert!(engine.process_chunk(chunk("a", 0, 4)).await);
    assert!(engine.process_chunk(final_chunk("a", 1, 6)).await);

    assert_eq!(
        log.types_for("a"),
        vec![
            "state_change",
            "state_change",
            "start",
            "chunk",
            "chunk",
            "state_change",
            "complete"
        ]
    );

    let events = log.all();
    let transitions: Vec<(BoundaryState, BoundaryState)> = events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::StateChange { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (BoundaryState::Idle, BoundaryState::Pending),
            (BoundaryState::Pending, BoundaryState::Streaming),
            (BoundaryState::Streaming, BoundaryState::Completed),
        ]
    );
    match &events.last().unwrap().kind {
        EventKind::Complete {
            chunk_count, bytes, ..
        } => {
            assert_eq!(*chunk_count, 2);
            assert_eq!(*bytes, 10);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn events_serialize_with_type_tag() {
    let engine = engine_with(|_| {});
    let log = EventLog::attach(&engine);
    engine.register("a", BoundaryConfig::default()).unwrap();
    engine.start("a").unwrap();
    assert!(engine.process_chunk(final_chunk("a", 0, 3)).await);

    let chunk_event = log
        .all()
        .into_iter()
        .find(|e| e.event_type() == "chunk")
        .unwrap();
    let value = serde_json::to_value(&chunk_event).unwrap();
    assert_eq!(value["boundary_id"], "a");
    assert_eq!(value["type"], "chunk");
    assert_eq!(value["size"], 3);
    assert_eq!(value["is_final"], true);
}

#[tokio::test]
async fn channel_and_unsubscribe() {
    let engine = engine_with(|_| {});
    let (subscription, mut rx) = engine.event_channel();
    let counted = Arc::new(AtomicUsize::new(0));
    let counter = counted.clone();
    let handler = engine.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    engine.register("a", BoundaryConfig::default()).unwrap();
    engine.start("a").unwrap();
    assert_eq!(rx.recv().await.unwrap().event_type(), "state_change");
    let seen = counted.load(Ordering::SeqCst);
    assert_eq!(seen, 3);

    assert!(handler.unsubscribe());
    assert!(subscription.unsubscribe());
    engine.pause("a").unwrap();
    assert_eq!(counted.load(Ordering::SeqCst), seen);
}

#[tokio::test]
async fn callbacks_may_reenter_engine() {
    let engine = engine_with(|c| c.max_concurrent_streams = 1);
    let chained = engine.clone();
    engine
        .register(
            "first",
            BoundaryConfig::default().on_complete(move |_, _| {
                chained.start("second").unwrap();
            }),
        )
        .unwrap();
    engine.register("second", BoundaryConfig::default()).unwrap();
    engine.start("first").unwrap();

    assert!(engine.process_chunk(final_chunk("first", 0, 1)).await);
    assert_eq!(engine.state("second"), Some(BoundaryState::Streaming));
}

#[tokio::test]
async fn panicking_callback_does_not_poison_engine() {
    let engine = engine_with(|_| {});
    engine
        .register("a", BoundaryConfig::default().on_start(|_| panic!("bad hook")))
        .unwrap();
    engine.start("a").unwrap();
    assert_eq!(engine.state("a"), Some(BoundaryState::Streaming));
    assert!(engine.process_chunk(final_chunk("a", 0, 1)).await);
    assert_eq!(engine.state("a"), Some(BoundaryState::Completed));
}

#[tokio::test]
async fn on_complete_receives_boundary_metrics() {
    let engine = engine_with(|_| {});
    let captured = Arc::new(Mutex::new(None));
    let sink = captured.clone();
    engine
        .register(
            "a",
            BoundaryConfig::new(Priority::High)
                .on_complete(move |_, metrics| *sink.lock() = Some(metrics.clone())),
        )
        .unwrap();
    engine.start("a").unwrap();
    assert!(engine.process_chunk(chunk("a", 0, 5)).await);
    assert!(engine.process_chunk(final_chunk("a", 1, 5)).await);

    let metrics = captured.lock().clone().unwrap();
    assert!(metrics.success);
    assert_eq!(metrics.priority, Priority::High);
    assert_eq!(metrics.chunk_count, 2);
    assert_eq!(metrics.bytes, 10);
    assert_eq!(metrics.retry_count, 0);
    assert!(metrics.time_to_first_chunk_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn metrics_track_streams_and_timing() {
    let engine = engine_with(|c| c.retry.base_delay_ms = 10);
    engine.register("ok", BoundaryConfig::new(Priority::Critical)).unwrap();
    engine
        .register(
            "bad",
            BoundaryConfig::new(Priority::Low)
                .with_transformer(|_| Err(StreamError::config("broken"))),
        )
        .unwrap();
    engine.register("gone", BoundaryConfig::new(Priority::Low)).unwrap();
    for id in ["ok", "bad", "gone"] {
        engine.start(id).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.process_chunk(chunk("ok", 0, 100)).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(engine.process_chunk(final_chunk("ok", 1, 50)).await);
    assert!(!engine.process_chunk(chunk("bad", 0, 1)).await);
    engine.abort("gone", None).unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.active_streams, 0);
    assert_eq!(metrics.completed_streams, 1);
    assert_eq!(metrics.failed_streams, 1);
    assert_eq!(metrics.aborted_streams, 1);
    assert_eq!(metrics.total_bytes_transferred, 150);
    assert_eq!(metrics.total_chunks, 2);
    assert_eq!(metrics.registered_by_priority[&Priority::Low], 2);
    assert_eq!(metrics.registered_by_priority[&Priority::Critical], 1);

    let ok = &metrics.boundaries["ok"];
    assert_eq!(ok.time_to_first_chunk_ms, Some(20));
    assert_eq!(ok.total_duration_ms, 50);
    assert_eq!(metrics.average_time_to_first_chunk_ms, 20.0);
    assert!(!metrics.boundaries.contains_key("gone"));
}
