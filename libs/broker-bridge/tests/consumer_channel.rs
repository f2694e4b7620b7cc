mod common;

use common::{RecordingProcess, ScriptedBroker, record, wait_for_state, wait_until};

use broker_api::{BrokerError, Payload};
use broker_bridge::{ConnectionState, ConsumerChannel, ConsumerConfig};
use serde_json::json;

fn config(topics: &[&str]) -> ConsumerConfig {
    let mut cfg = ConsumerConfig::new("orders-consumer", topics.iter().map(|t| t.to_string()).collect());
    cfg.consumer_group_id = Some("orders".into());
    cfg
}

// ============================================================================
// Connect / subscribe policy
// ============================================================================

#[tokio::test]
async fn connect_recovers_after_one_failure() {
    let broker = ScriptedBroker::new().fail_consumer_connect(1);
    let process = RecordingProcess::new();
    let channel = ConsumerChannel::new(&config(&["t1"]), broker.client(), process.clone()).unwrap();

    wait_until(|| broker.run_entered()).await;
    assert_eq!(channel.state(), ConnectionState::Connected);
    assert_eq!(broker.script.consumer_connects.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(process.exits().is_empty());
    channel.disconnect().await.unwrap();
}

#[tokio::test]
async fn second_connect_failure_terminates() {
    let broker = ScriptedBroker::new().fail_consumer_connect(2);
    let process = RecordingProcess::new();
    let channel = ConsumerChannel::new(&config(&["t1"]), broker.client(), process.clone()).unwrap();

    assert_eq!(process.wait_exit().await, 1);
    wait_for_state(channel.watch_state(), ConnectionState::Fatal).await;
    assert!(broker.subscribe_attempts().is_empty());
    assert!(!broker.run_entered());
}

#[tokio::test]
async fn topics_are_subscribed_in_order_before_run() {
    let broker = ScriptedBroker::new().fail_subscribe("t2", 1);
    let process = RecordingProcess::new();
    let channel =
        ConsumerChannel::new(&config(&["t1", "t2", "t3"]), broker.client(), process.clone()).unwrap();

    wait_until(|| broker.run_entered()).await;
    assert_eq!(broker.subscribe_attempts(), vec!["t1", "t2", "t2", "t3"]);
    assert!(process.exits().is_empty());
    channel.disconnect().await.unwrap();
}

#[tokio::test]
async fn second_subscribe_failure_terminates_before_run() {
    let broker = ScriptedBroker::new().fail_subscribe("t2", 2);
    let process = RecordingProcess::new();
    let _channel =
        ConsumerChannel::new(&config(&["t1", "t2", "t3"]), broker.client(), process.clone()).unwrap();

    assert_eq!(process.wait_exit().await, 1);
    assert_eq!(broker.subscribe_attempts(), vec!["t1", "t2", "t2"]);
    assert!(!broker.run_entered());
}

#[tokio::test]
async fn second_subscribe_failure_on_only_topic_never_runs() {
    let broker = ScriptedBroker::new().fail_subscribe("t1", 2);
    let process = RecordingProcess::new();
    let channel = ConsumerChannel::new(&config(&["t1"]), broker.client(), process.clone()).unwrap();

    assert_ne!(process.wait_exit().await, 0);
    wait_for_state(channel.watch_state(), ConnectionState::Fatal).await;
    assert_eq!(broker.subscribe_attempts(), vec!["t1", "t1"]);
    assert!(!broker.run_entered());
}

#[tokio::test]
async fn run_failure_terminates() {
    let broker = ScriptedBroker::new().fail_run(BrokerError::connection("coordinator lost"));
    let process = RecordingProcess::new();
    let channel = ConsumerChannel::new(&config(&["t1"]), broker.client(), process.clone()).unwrap();

    assert_eq!(process.wait_exit().await, 1);
    wait_for_state(channel.watch_state(), ConnectionState::Fatal).await;
}

// ============================================================================
// Decoding and delivery
// ============================================================================

#[tokio::test]
async fn json_and_raw_values_are_decoded() {
    let broker = ScriptedBroker::new()
        .deliver(record("t1", br#"{"a":1}"#).with_key("k1").with_partition(2))
        .deliver(record("t1", b"hello"));
    let channel =
        ConsumerChannel::new(&config(&["t1"]), broker.client(), RecordingProcess::new()).unwrap();
    let mut events = channel.subscribe();

    let first = events.recv().await.unwrap();
    assert_eq!(first.topic, "t1");
    assert_eq!(first.message.key.as_deref(), Some("k1"));
    assert_eq!(first.message.partition, Some(2));
    assert_eq!(first.message.value, Payload::Json(json!({"a": 1})));

    let second = events.recv().await.unwrap();
    assert_eq!(second.message.value, Payload::Raw("hello".into()));
    assert_eq!(second.message.key, None);
    channel.disconnect().await.unwrap();
}

#[tokio::test]
async fn delivery_order_is_preserved() {
    let mut broker = ScriptedBroker::new();
    for i in 0..100 {
        broker = broker.deliver(record("t1", i.to_string().as_bytes()));
    }
    let channel =
        ConsumerChannel::new(&config(&["t1"]), broker.client(), RecordingProcess::new()).unwrap();
    let mut events = channel.subscribe();

    for i in 0..100 {
        let msg = events.recv().await.unwrap();
        assert_eq!(msg.message.value, Payload::Json(json!(i)));
    }
    channel.disconnect().await.unwrap();
}

#[tokio::test]
async fn bad_record_is_skipped_and_consumption_continues() {
    let mut missing = record("t1", b"");
    missing.value = None;
    let broker = ScriptedBroker::new()
        .deliver(record("t1", b"1"))
        .deliver(missing)
        .deliver(record("", b"no-topic"))
        .deliver(record("t1", b"2"));
    let process = RecordingProcess::new();
    let channel = ConsumerChannel::new(&config(&["t1"]), broker.client(), process.clone()).unwrap();
    let mut events = channel.subscribe();

    assert_eq!(events.recv().await.unwrap().message.value, Payload::Json(json!(1)));
    assert_eq!(events.recv().await.unwrap().message.value, Payload::Json(json!(2)));
    assert!(process.exits().is_empty());
    channel.disconnect().await.unwrap();
}

#[tokio::test]
async fn every_subscriber_sees_every_event() {
    let broker = ScriptedBroker::new().deliver(record("t1", b"x"));
    let channel =
        ConsumerChannel::new(&config(&["t1"]), broker.client(), RecordingProcess::new()).unwrap();
    let mut a = channel.subscribe();
    let mut b = channel.subscribe();

    assert_eq!(a.recv().await.unwrap().message.value, Payload::Raw("x".into()));
    assert_eq!(b.recv().await.unwrap().message.value, Payload::Raw("x".into()));
    channel.disconnect().await.unwrap();
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn disconnect_is_idempotent_and_completes_subscribers_once() {
    let broker = ScriptedBroker::new();
    let channel =
        ConsumerChannel::new(&config(&["t1"]), broker.client(), RecordingProcess::new()).unwrap();
    let mut events = channel.subscribe();
    wait_until(|| broker.run_entered()).await;

    channel.disconnect().await.unwrap();
    channel.disconnect().await.unwrap();

    assert!(events.recv().await.is_none());
    assert!(events.recv().await.is_none());
    assert_eq!(broker.script.consumer_disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(channel.subject().is_closed());
}

#[tokio::test]
async fn disconnect_before_connect_completes() {
    let broker = ScriptedBroker::new();
    let channel =
        ConsumerChannel::new(&config(&["t1"]), broker.client(), RecordingProcess::new()).unwrap();
    let mut events = channel.subscribe();

    channel.disconnect().await.unwrap();
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn disconnect_error_is_reported_and_bus_still_completes() {
    let broker = ScriptedBroker::new().fail_disconnect(BrokerError::connection("socket closed"));
    let channel =
        ConsumerChannel::new(&config(&["t1"]), broker.client(), RecordingProcess::new()).unwrap();
    let mut events = channel.subscribe();

    assert!(channel.disconnect().await.is_err());
    assert!(events.recv().await.is_none());
}

#[test]
fn construction_outside_runtime_fails() {
    let err =
        ConsumerChannel::new(&config(&["t1"]), ScriptedBroker::new().client(), RecordingProcess::new())
            .unwrap_err();
    assert!(matches!(err, broker_bridge::BridgeError::NoRuntime(_)));
}
