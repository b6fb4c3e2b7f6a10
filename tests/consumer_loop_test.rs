//! End-to-end behaviour of the consumer loop against the in-memory broker.

mod common;

use std::time::{Duration, Instant};

use common::{body_for, config_with_concurrency, Harness, MockProcessor};
use queue_dispatch::messaging::{BrokerError, SettlementKind};
use queue_dispatch::{ConsumerState, ExitStatus, LoopOutcome, ServiceError};

#[tokio::test]
async fn test_single_item_success_acks_once() {
    let mut harness = Harness::start(MockProcessor::new(), config_with_concurrency(4));
    harness.wait_listening().await;

    let tag = harness.broker.publish(r#"[{"key":"a.jpg"}]"#);
    harness.wait_for_settlements(1).await;

    assert_eq!(harness.broker.acks_for(tag), 1);
    assert_eq!(harness.broker.rejects_for(tag), 0);
    assert_eq!(harness.processor.calls(), vec!["a.jpg"]);

    let outcome = harness.stop().await;
    assert_eq!(outcome.exit_status(), ExitStatus::Clean);
    assert_eq!(outcome.stats().acked, 1);
    assert_eq!(outcome.stats().rejected, 0);
}

#[tokio::test]
async fn test_one_failing_item_rejects_and_runs_every_call() {
    let processor = MockProcessor::new()
        .with_delay(Duration::from_millis(20))
        .failing_on("b.jpg");
    let mut harness = Harness::start(processor, config_with_concurrency(4));
    harness.wait_listening().await;

    let tag = harness
        .broker
        .publish(r#"[{"key":"a.jpg"},{"key":"b.jpg"}]"#);
    harness.wait_for_settlements(1).await;

    assert_eq!(harness.broker.rejects_for(tag), 1);
    assert_eq!(harness.broker.acks_for(tag), 0);

    let mut calls = harness.processor.calls();
    calls.sort();
    assert_eq!(calls, vec!["a.jpg", "b.jpg"]);
    assert_eq!(harness.processor.max_active(), 2, "items should run concurrently");

    let outcome = harness.stop().await;
    assert_eq!(outcome.stats().processor_failures, 1);
}

#[tokio::test]
async fn test_malformed_bodies_reject_without_processor_calls() {
    let mut harness = Harness::start(MockProcessor::new(), config_with_concurrency(4));
    harness.wait_listening().await;

    let bodies = ["not-json", r#"{"key":"a.jpg"}"#, r#"[{"path":"a.jpg"}]"#, "[]"];
    let tags: Vec<u64> = bodies.iter().map(|b| harness.broker.publish(*b)).collect();
    harness.wait_for_settlements(bodies.len()).await;

    for tag in tags {
        assert_eq!(harness.broker.rejects_for(tag), 1);
        assert_eq!(harness.broker.acks_for(tag), 0);
    }
    assert!(harness.processor.calls().is_empty());

    let outcome = harness.stop().await;
    assert_eq!(outcome.stats().decode_failures, 4);
}

#[tokio::test]
async fn test_panicking_processor_rejects_and_loop_continues() {
    let processor = MockProcessor::new().panicking_on("boom.jpg");
    let mut harness = Harness::start(processor, config_with_concurrency(4));
    harness.wait_listening().await;

    let bad = harness.broker.publish(body_for("boom.jpg"));
    harness.wait_for_settlements(1).await;
    let good = harness.broker.publish(body_for("fine.jpg"));
    harness.wait_for_settlements(2).await;

    assert_eq!(harness.broker.rejects_for(bad), 1);
    assert_eq!(harness.broker.acks_for(good), 1);
    assert_eq!(*harness.states.borrow(), ConsumerState::Listening);

    let outcome = harness.stop().await;
    assert_eq!(outcome.exit_status(), ExitStatus::Clean);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_limit() {
    let processor = MockProcessor::new().with_delay(Duration::from_millis(50));
    let mut harness = Harness::start(processor, config_with_concurrency(2));
    harness.wait_listening().await;

    let tags: Vec<u64> = (0..5)
        .map(|i| harness.broker.publish(body_for(&format!("img-{i}.jpg"))))
        .collect();
    harness.wait_for_settlements(5).await;

    for tag in tags {
        assert_eq!(harness.broker.acks_for(tag), 1);
    }
    assert!(harness.processor.max_active() <= 2);
    assert!(harness.gate.peak_in_flight() <= 2);

    // Permits drop after settlement; the gate is only idle once the tasks are joined.
    let gate = harness.gate.clone();
    let outcome = harness.stop().await;
    assert_eq!(gate.in_flight(), 0);
    assert_eq!(gate.available(), 2);
    assert_eq!(outcome.stats().peak_in_flight, 2);
}

#[tokio::test]
async fn test_every_permit_is_returned() {
    let processor = MockProcessor::new().failing_on("bad.jpg");
    let mut harness = Harness::start(processor, config_with_concurrency(3));
    harness.wait_listening().await;

    harness.broker.publish("not-json");
    harness.broker.publish(body_for("ok.jpg"));
    harness.broker.publish(body_for("bad.jpg"));
    harness.broker.publish(r#"[{"key":7}]"#);
    harness.broker.publish(body_for("ok-2.jpg"));
    harness.wait_for_settlements(5).await;

    // Settlement is recorded before the permit drops; let the tasks finish.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.gate.in_flight() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(harness.gate.in_flight(), 0);
    assert_eq!(harness.gate.available(), 3);

    let outcome = harness.stop().await;
    let stats = outcome.stats();
    assert_eq!(stats.acked, 2);
    assert_eq!(stats.rejected, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_limit_of_one_serializes_messages() {
    let processor = MockProcessor::new().with_delay(Duration::from_millis(100));
    let mut harness = Harness::start(processor, config_with_concurrency(1));
    harness.wait_listening().await;

    let started = Instant::now();
    let first = harness.broker.publish(body_for("a.jpg"));
    let second = harness.broker.publish(body_for("b.jpg"));
    harness.wait_for_settlements(2).await;
    let elapsed = started.elapsed();

    assert!(
        elapsed >= Duration::from_millis(200),
        "messages overlapped: finished in {elapsed:?}"
    );
    assert_eq!(harness.broker.acks_for(first), 1);
    assert_eq!(harness.broker.acks_for(second), 1);
    assert_eq!(harness.processor.max_active(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_stream_failure_is_fatal_and_stops_consuming() {
    let mut harness = Harness::start(MockProcessor::new(), config_with_concurrency(4));
    harness.wait_listening().await;

    let first = harness.broker.publish(body_for("a.jpg"));
    harness.wait_for_settlements(1).await;

    harness
        .broker
        .fail_stream(BrokerError::reconnect_exhausted(6, "connection reset"));
    let after = harness.broker.publish(body_for("never.jpg"));

    let broker = harness.broker.clone();
    let states = harness.states.clone();
    let outcome = harness.join().await;

    assert_eq!(outcome.exit_status(), ExitStatus::Fatal);
    assert_eq!(outcome.exit_status().code(), 1);
    assert!(matches!(
        outcome,
        LoopOutcome::Failed {
            error: ServiceError::Broker(BrokerError::ReconnectExhausted { .. }),
            ..
        }
    ));
    assert_eq!(*states.borrow(), ConsumerState::Terminating);

    assert_eq!(broker.acks_for(first), 1);
    assert_eq!(broker.acks_for(after), 0);
    assert_eq!(broker.rejects_for(after), 0);
    assert_eq!(outcome.stats().received, 1);
}

#[tokio::test]
async fn test_setup_failure_is_fatal() {
    let harness = Harness::start_with(
        MockProcessor::new(),
        config_with_concurrency(4),
        |broker| broker.fail_open(BrokerError::queue_conflict("test_queue", "PRECONDITION_FAILED")),
    );

    let outcome = harness.join().await;
    assert_eq!(outcome.exit_status(), ExitStatus::Fatal);
    assert!(matches!(
        outcome.error(),
        Some(ServiceError::Broker(BrokerError::QueueConflict { .. }))
    ));
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_work() {
    let processor = MockProcessor::new().with_delay(Duration::from_millis(150));
    let mut harness = Harness::start(processor, config_with_concurrency(4));
    harness.wait_listening().await;

    let tag = harness.broker.publish(body_for("slow.jpg"));
    harness.wait_for_calls(1).await;

    let broker = harness.broker.clone();
    let outcome = harness.stop().await;

    assert_eq!(outcome.exit_status(), ExitStatus::Clean);
    assert_eq!(outcome.exit_status().code(), 0);
    assert_eq!(broker.acks_for(tag), 1);
    assert_eq!(outcome.stats().acked, 1);
    assert_eq!(outcome.stats().abandoned, 0);
}

#[tokio::test]
async fn test_drain_timeout_abandons_stuck_work() {
    let processor = MockProcessor::new().with_delay(Duration::from_secs(30));
    let mut config = config_with_concurrency(4);
    config.shutdown.drain_timeout_ms = Some(50);
    let mut harness = Harness::start(processor, config);
    harness.wait_listening().await;

    let tag = harness.broker.publish(body_for("stuck.jpg"));
    harness.wait_for_calls(1).await;

    let broker = harness.broker.clone();
    let outcome = harness.stop().await;

    assert_eq!(outcome.exit_status(), ExitStatus::Clean);
    assert_eq!(outcome.stats().abandoned, 1);
    assert!(broker.settlements().iter().all(|s| s.delivery_tag != tag));
}

#[tokio::test]
async fn test_settlement_kinds_follow_outcomes_in_any_order() {
    let processor = MockProcessor::new()
        .with_delay(Duration::from_millis(10))
        .failing_on("x.jpg");
    let mut harness = Harness::start(processor, config_with_concurrency(8));
    harness.wait_listening().await;

    let ok = harness.broker.publish(r#"[{"key":"a.jpg"},{"key":"b.jpg"}]"#);
    let failed = harness.broker.publish(r#"[{"key":"c.jpg"},{"key":"x.jpg"}]"#);
    let redelivered = harness.broker.publish_redelivered(body_for("d.jpg"));
    harness.wait_for_settlements(3).await;

    let settlements = harness.broker.settlements();
    let kind_of = |tag: u64| {
        settlements
            .iter()
            .find(|s| s.delivery_tag == tag)
            .map(|s| s.kind)
    };
    assert_eq!(kind_of(ok), Some(SettlementKind::Ack));
    assert_eq!(kind_of(failed), Some(SettlementKind::Reject));
    assert_eq!(kind_of(redelivered), Some(SettlementKind::Ack));

    harness.stop().await;
}
