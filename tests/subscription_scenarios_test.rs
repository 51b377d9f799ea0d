//! End-to-end consumption scenarios against the in-memory broker
//!
//! Covers payload decoding, ack/nack resolution, sync ordering and the async
//! draining window.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use common::{Behavior, RecordingHandler};
use pulsar_connector::broker::in_memory::InMemoryBroker;
use pulsar_connector::broker::ProducerMessage;
use pulsar_connector::config::{PayloadFormat, ProcessingMode, RunnerSettings};
use pulsar_connector::trigger::{
    HandlerAttributes, HandlerContext, MessageHandler, SubscriberOutput, TriggerCoordinator,
};

const TOPIC: &str = "persistent://public/default/orders";

#[tokio::test]
async fn test_json_payload_is_decoded_and_acked() {
    let broker = InMemoryBroker::new();
    let handler = RecordingHandler::new("orders", Behavior::Succeed);
    let coordinator = common::single_worker(
        &broker,
        common::subscription(TOPIC, "billing", ProcessingMode::Sync, PayloadFormat::Json),
        Arc::clone(&handler),
        RunnerSettings::default(),
    );

    let id = broker.publish(TOPIC, ProducerMessage::new(r#"{"a":1}"#));
    coordinator.start().await;

    common::wait_until("message acked", || broker.acked().len() == 1).await;
    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload, json!({"a": 1}));
    assert_eq!(calls[0].topic, TOPIC);
    assert_eq!(calls[0].redelivery_count, 0);
    assert_eq!(broker.acked(), vec![id]);
    assert!(broker.nacked().is_empty());

    coordinator.stop().await;
}

#[tokio::test]
async fn test_undecodable_json_is_nacked_without_calling_handler() {
    let broker = InMemoryBroker::new();
    let handler = RecordingHandler::new("orders", Behavior::Succeed);
    let coordinator = common::single_worker(
        &broker,
        common::subscription(TOPIC, "billing", ProcessingMode::Sync, PayloadFormat::Json),
        Arc::clone(&handler),
        RunnerSettings::default(),
    );

    let id = broker.publish(TOPIC, ProducerMessage::new("not-json"));
    coordinator.start().await;

    common::wait_until("message nacked", || broker.nacked().len() == 1).await;
    assert_eq!(broker.nacked(), vec![id]);
    assert!(handler.calls().is_empty());
    assert!(broker.acked().is_empty());

    let stats = coordinator.workers()[0].stats();
    assert_eq!(stats.get_decode_failures(), 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_raw_payload_is_passed_as_string() {
    let broker = InMemoryBroker::new();
    let handler = RecordingHandler::new("orders", Behavior::Succeed);
    let coordinator = common::single_worker(
        &broker,
        common::subscription(TOPIC, "audit", ProcessingMode::Sync, PayloadFormat::Raw),
        Arc::clone(&handler),
        RunnerSettings::default(),
    );

    broker.publish(
        TOPIC,
        ProducerMessage::new("hello").with_property("origin", "checkout"),
    );
    coordinator.start().await;

    common::wait_until("message acked", || broker.acked().len() == 1).await;
    let calls = handler.calls();
    assert_eq!(calls[0].payload, json!("hello"));
    assert_eq!(calls[0].properties["origin"], "checkout");

    coordinator.stop().await;
}

#[tokio::test]
async fn test_handler_requested_nack_overrides_success() {
    let broker = InMemoryBroker::new();
    let handler = RecordingHandler::new("orders", Behavior::RequestNack);
    let coordinator = common::single_worker(
        &broker,
        common::subscription(TOPIC, "billing", ProcessingMode::Sync, PayloadFormat::Raw),
        Arc::clone(&handler),
        RunnerSettings::default(),
    );

    let id = broker.publish(TOPIC, ProducerMessage::new("payload"));
    coordinator.start().await;

    common::wait_until("message nacked", || broker.nacked().len() == 1).await;
    assert_eq!(broker.nacked(), vec![id]);
    assert!(broker.acked().is_empty());
    assert_eq!(handler.calls().len(), 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_handler_failure_is_nacked() {
    let broker = InMemoryBroker::new();
    let handler = RecordingHandler::new("orders", Behavior::Fail);
    let coordinator = common::single_worker(
        &broker,
        common::subscription(TOPIC, "billing", ProcessingMode::Async, PayloadFormat::Raw),
        Arc::clone(&handler),
        RunnerSettings::default(),
    );

    broker.publish(TOPIC, ProducerMessage::new("payload"));
    coordinator.start().await;

    common::wait_until("message nacked", || broker.nacked().len() == 1).await;
    let stats = coordinator.workers()[0].stats();
    assert_eq!(stats.get_handler_failures(), 1);
    assert!(broker.acked().is_empty());

    coordinator.stop().await;
}

#[tokio::test]
async fn test_async_window_drains_before_admitting_more() {
    let broker = InMemoryBroker::new();
    let gate = Arc::new(Semaphore::new(0));
    let handler = RecordingHandler::new("orders", Behavior::Gated(Arc::clone(&gate)));
    let coordinator = common::single_worker(
        &broker,
        common::subscription(TOPIC, "billing", ProcessingMode::Async, PayloadFormat::Raw),
        Arc::clone(&handler),
        common::pooled(2),
    );

    for n in 0..5 {
        broker.publish(TOPIC, ProducerMessage::new(format!("m{n}")));
    }
    coordinator.start().await;
    let stats = coordinator.workers()[0].stats();

    // First window: exactly two dispatched, the third not pulled
    common::wait_until("first window dispatched", || handler.started() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.started(), 2);
    assert_eq!(stats.get_received(), 2);

    // One slot freed is not enough to admit the third
    gate.add_permits(1);
    common::wait_until("first completion acked", || broker.acked().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stats.get_received(), 2);
    assert_eq!(handler.started(), 2);

    // Both done: the window drained and the next batch is admitted
    gate.add_permits(1);
    common::wait_until("second window dispatched", || handler.started() == 4).await;
    assert_eq!(broker.acked().len(), 2);
    assert_eq!(stats.get_received(), 4);

    gate.add_permits(3);
    common::wait_until("all acked", || broker.acked().len() == 5).await;
    assert!(handler.peak_concurrency() <= 2);
    assert!(stats.get_window_drains() >= 2);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_fast_handlers_never_fill_the_window() {
    let broker = InMemoryBroker::new();
    let handler = RecordingHandler::new("orders", Behavior::Succeed);
    let coordinator = common::single_worker(
        &broker,
        common::subscription(TOPIC, "billing", ProcessingMode::Async, PayloadFormat::Raw),
        Arc::clone(&handler),
        common::pooled(2),
    );
    coordinator.start().await;
    let stats = coordinator.workers()[0].stats();

    // Each message finishes before the next arrives, so at most one is ever in flight
    for n in 0..5 {
        broker.publish(TOPIC, ProducerMessage::new(format!("m{n}")));
        common::wait_until("message acked", || broker.acked().len() == n + 1).await;
    }

    assert_eq!(stats.get_received(), 5);
    assert_eq!(stats.get_window_drains(), 0);
    assert!(handler.peak_concurrency() <= 2);

    coordinator.stop().await;
}

/// Records how many acks had been issued when each call started
struct OrderingHandler {
    broker: InMemoryBroker,
    observed: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl MessageHandler for OrderingHandler {
    fn name(&self) -> &str {
        "ordering"
    }

    async fn handle(
        &self,
        _context: HandlerContext,
        output: SubscriberOutput,
    ) -> anyhow::Result<HandlerAttributes> {
        let payload = output.payload.as_str().unwrap_or_default().to_string();
        self.observed.lock().push((payload, self.broker.acked().len()));
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(HandlerAttributes::new())
    }
}

#[tokio::test]
async fn test_sync_worker_handles_in_delivery_order() {
    let broker = InMemoryBroker::new();
    let handler = Arc::new(OrderingHandler {
        broker: broker.clone(),
        observed: Mutex::new(Vec::new()),
    });
    let coordinator = TriggerCoordinator::with_retry_policy(
        common::connection(&broker),
        &common::context(),
        RunnerSettings::default(),
        vec![(
            common::subscription(TOPIC, "ledger", ProcessingMode::Sync, PayloadFormat::Raw),
            Arc::clone(&handler) as Arc<dyn MessageHandler>,
        )],
        common::fast_retry(),
    )
    .unwrap();

    for n in 0..6 {
        broker.publish(TOPIC, ProducerMessage::new(format!("m{n}")));
    }
    coordinator.start().await;
    common::wait_until("all acked", || broker.acked().len() == 6).await;

    let observed = handler.observed.lock().clone();
    for (index, (payload, acked_before)) in observed.iter().enumerate() {
        assert_eq!(payload, &format!("m{index}"));
        assert_eq!(*acked_before, index, "message {index} started before its predecessor was acked");
    }

    coordinator.stop().await;
}

#[tokio::test]
async fn test_handler_receives_event_id() {
    let broker = InMemoryBroker::new();
    let handler = RecordingHandler::new("orders", Behavior::Succeed);
    let coordinator = common::single_worker(
        &broker,
        common::subscription(TOPIC, "billing", ProcessingMode::Sync, PayloadFormat::Raw),
        Arc::clone(&handler),
        RunnerSettings::default(),
    );

    let id = broker.publish(TOPIC, ProducerMessage::new("x"));
    coordinator.start().await;
    common::wait_until("handled", || handler.calls().len() == 1).await;

    let contexts = handler.contexts();
    assert_eq!(contexts[0].handler_name, "orders");
    assert_eq!(contexts[0].event_id.as_deref(), Some(id.to_hex().as_str()));
    assert_eq!(handler.calls()[0].msgid, id.to_hex());

    coordinator.stop().await;
}
