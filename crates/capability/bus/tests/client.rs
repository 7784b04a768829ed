use async_trait::async_trait;
use edge_bus::{BusClient, BusError, BusLink, MessageHandler};
use rumqttc::{AsyncClient, ConnAck, ConnectReturnCode, Event, MqttOptions, Packet, Publish, QoS};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 记录所有调用的假链路。
#[derive(Default)]
struct RecordingLink {
    subscribes: Mutex<Vec<String>>,
    publishes: Mutex<Vec<(String, Vec<u8>, bool)>>,
    disconnects: Mutex<usize>,
}

#[async_trait]
impl BusLink for RecordingLink {
    async fn subscribe(&self, filter: &str, _qos: QoS) -> Result<(), BusError> {
        self.subscribes.lock().expect("subs").push(filter.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        _qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        self.publishes
            .lock()
            .expect("pubs")
            .push((topic.to_string(), payload, retain));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        *self.disconnects.lock().expect("disconnects") += 1;
        Ok(())
    }
}

struct Capture(Arc<Mutex<Vec<(String, Value)>>>);

#[async_trait]
impl MessageHandler for Capture {
    async fn handle(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        self.0.lock().expect("capture").push((topic.to_string(), payload));
        Ok(())
    }
}

fn connack(code: ConnectReturnCode) -> Event {
    Event::Incoming(Packet::ConnAck(ConnAck {
        session_present: false,
        code,
    }))
}

fn inbound(topic: &str, payload: &[u8]) -> Event {
    Event::Incoming(Packet::Publish(Publish::new(
        topic,
        QoS::AtLeastOnce,
        payload.to_vec(),
    )))
}

fn client_with_link() -> (Arc<BusClient>, Arc<RecordingLink>) {
    let link = Arc::new(RecordingLink::default());
    let client = BusClient::with_link(link.clone(), Duration::from_millis(10), 1, 1);
    (client, link)
}

#[tokio::test]
async fn publish_fails_fast_when_disconnected() {
    let (client, link) = client_with_link();
    assert!(!client.is_connected());
    assert!(!client.publish("cm/sensors/alerts/full", &json!({"a": 1}), false).await);
    assert!(link.publishes.lock().expect("pubs").is_empty());

    client.handle_event(connack(ConnectReturnCode::Success)).await;
    assert!(client.publish("cm/sensors/alerts/full", &json!({"a": 1}), true).await);
    let publishes = link.publishes.lock().expect("pubs");
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].0, "cm/sensors/alerts/full");
    assert!(publishes[0].2);
    let body: Value = serde_json::from_slice(&publishes[0].1).expect("json");
    assert_eq!(body["a"], 1);
}

#[tokio::test]
async fn subscriptions_deferred_until_connack_then_reissued() {
    let (client, link) = client_with_link();
    let captured = Arc::new(Mutex::new(Vec::new()));
    client
        .subscribe("cm/devices/events/+", Arc::new(Capture(captured.clone())))
        .await
        .expect("subscribe");
    client
        .subscribe("cm/containers/#", Arc::new(Capture(captured.clone())))
        .await
        .expect("subscribe");
    assert!(link.subscribes.lock().expect("subs").is_empty());

    client.handle_event(connack(ConnectReturnCode::Success)).await;
    assert_eq!(
        *link.subscribes.lock().expect("subs"),
        vec!["cm/devices/events/+".to_string(), "cm/containers/#".to_string()]
    );

    client
        .subscribe("cm/extra", Arc::new(Capture(captured)))
        .await
        .expect("subscribe");
    assert_eq!(link.subscribes.lock().expect("subs").len(), 3);
}

#[tokio::test]
async fn invalid_filter_is_rejected() {
    let (client, _link) = client_with_link();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let err = client
        .subscribe("cm/#/x", Arc::new(Capture(captured)))
        .await
        .expect_err("invalid");
    assert!(matches!(err, BusError::InvalidFilter(_)));
}

#[tokio::test]
async fn disconnect_publish_false_single_reconnect_resubscribe() {
    let (client, link) = client_with_link();
    let captured = Arc::new(Mutex::new(Vec::new()));
    client
        .subscribe("cm/devices/events/+", Arc::new(Capture(captured)))
        .await
        .expect("subscribe");
    client.handle_event(connack(ConnectReturnCode::Success)).await;
    assert_eq!(link.subscribes.lock().expect("subs").len(), 1);

    // 连接中断：两次并发失败只调度一次重连
    assert!(client.handle_connection_error("network unreachable"));
    assert!(!client.handle_connection_error("network unreachable"));
    assert!(client.is_reconnecting());
    assert!(!client.is_connected());
    assert!(!client.publish("cm/sensors/readings/batch", &json!({}), false).await);
    assert!(link.publishes.lock().expect("pubs").is_empty());

    client.handle_event(connack(ConnectReturnCode::Success)).await;
    assert!(client.is_connected());
    assert!(!client.is_reconnecting());
    assert_eq!(
        *link.subscribes.lock().expect("subs"),
        vec!["cm/devices/events/+".to_string(), "cm/devices/events/+".to_string()]
    );
    assert!(client.publish("cm/sensors/readings/batch", &json!({}), false).await);
}

#[tokio::test]
async fn refused_connack_schedules_reconnect() {
    let (client, _link) = client_with_link();
    client
        .handle_event(connack(ConnectReturnCode::NotAuthorized))
        .await;
    assert!(!client.is_connected());
    assert!(client.is_reconnecting());
}

#[tokio::test]
async fn inbound_messages_routed_or_dropped() {
    let (client, _link) = client_with_link();
    let created = Arc::new(Mutex::new(Vec::new()));
    let wildcard = Arc::new(Mutex::new(Vec::new()));
    client
        .subscribe("cm/#", Arc::new(Capture(wildcard.clone())))
        .await
        .expect("subscribe");
    client
        .subscribe("cm/devices/events/created", Arc::new(Capture(created.clone())))
        .await
        .expect("subscribe");

    client
        .handle_event(inbound(
            "cm/devices/events/created",
            br#"{"deviceId":"d-1","deviceIdentifier":"SENSOR-001"}"#,
        ))
        .await;
    client
        .handle_event(inbound("cm/containers/events/config/updated", br#"{"x":1}"#))
        .await;
    client.handle_event(inbound("cm/devices/events/created", b"not json")).await;
    client.handle_event(inbound("other/topic", br#"{}"#)).await;

    let created = created.lock().expect("created");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1["deviceIdentifier"], "SENSOR-001");
    let wildcard = wildcard.lock().expect("wildcard");
    assert_eq!(wildcard.len(), 1);
    assert_eq!(wildcard[0].0, "cm/containers/events/config/updated");
}

#[tokio::test]
async fn disconnect_clears_connected_flag() {
    let (client, link) = client_with_link();
    client.handle_event(connack(ConnectReturnCode::Success)).await;
    client.disconnect().await;
    assert!(!client.is_connected());
    assert_eq!(*link.disconnects.lock().expect("disconnects"), 1);
    assert!(!client.publish("t", &json!({}), false).await);
}

/// 请求永不完成的链路（模拟阻塞的 broker 连接）。
struct StalledLink;

#[async_trait]
impl BusLink for StalledLink {
    async fn subscribe(&self, _filter: &str, _qos: QoS) -> Result<(), BusError> {
        std::future::pending::<Result<(), BusError>>().await
    }

    async fn publish(
        &self,
        _topic: &str,
        _qos: QoS,
        _retain: bool,
        _payload: Vec<u8>,
    ) -> Result<(), BusError> {
        std::future::pending::<Result<(), BusError>>().await
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        std::future::pending::<Result<(), BusError>>().await
    }
}

#[tokio::test]
async fn connack_with_full_request_channel_does_not_block() {
    // 事件循环从不 poll，容量 1 的请求通道被一次发布占满
    let (mqtt, _eventloop) = AsyncClient::new(MqttOptions::new("edge-test", "localhost", 1883), 1);
    mqtt.try_publish("cm/fill", QoS::AtLeastOnce, false, b"{}".to_vec())
        .expect("fill request channel");
    let client = BusClient::with_link(Arc::new(mqtt), Duration::from_millis(10), 1, 1);
    let captured = Arc::new(Mutex::new(Vec::new()));
    client
        .subscribe("cmd/#", Arc::new(Capture(captured)))
        .await
        .expect("deferred subscribe");

    let finished = tokio::time::timeout(
        Duration::from_secs(2),
        client.handle_event(connack(ConnectReturnCode::Success)),
    )
    .await;
    assert!(finished.is_ok(), "connack handling blocked on a full request channel");
    assert!(client.is_connected());

    let published = tokio::time::timeout(
        Duration::from_secs(2),
        client.publish("cm/sensors/readings/batch", &json!({}), false),
    )
    .await
    .expect("publish returns promptly");
    assert!(!published);
}

#[tokio::test(start_paused = true)]
async fn stalled_link_requests_time_out() {
    let client = BusClient::with_link(Arc::new(StalledLink), Duration::from_millis(10), 1, 1);
    let captured = Arc::new(Mutex::new(Vec::new()));
    client
        .subscribe("cm/devices/events/+", Arc::new(Capture(captured.clone())))
        .await
        .expect("deferred subscribe");

    // 暂停时钟下超时由运行时自动推进
    client.handle_event(connack(ConnectReturnCode::Success)).await;
    assert!(client.is_connected());
    assert!(!client.publish("cm/sensors/alerts/full", &json!({"a": 1}), false).await);
    let err = client
        .subscribe("cm/extra", Arc::new(Capture(captured)))
        .await
        .expect_err("timed out");
    assert!(matches!(err, BusError::Client(_)));
    client.disconnect().await;
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn reconnect_attempt_waits_for_configured_delay() {
    let delay = Duration::from_secs(5);
    let link = Arc::new(RecordingLink::default());
    let client = BusClient::with_link(link, delay, 1, 1);
    client.handle_event(connack(ConnectReturnCode::Success)).await;

    let recovering = {
        let client = client.clone();
        tokio::spawn(async move { client.recover_from_error("connection reset").await })
    };
    tokio::task::yield_now().await;
    assert!(!client.is_connected());
    assert!(client.is_reconnecting());

    tokio::time::advance(delay - Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    assert!(client.is_reconnecting());

    tokio::time::advance(Duration::from_millis(200)).await;
    recovering.await.expect("recovery task");
    assert!(!client.is_reconnecting());
    assert!(!client.is_connected());
}
