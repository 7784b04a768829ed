//! MQTT 总线客户端。
//!
//! rumqttc 的 `EventLoop` 在独立任务中驱动：连接成功（ConnAck）时重新订阅全部过滤器，
//! 入站消息在该任务内按订阅表分发；连接错误时标记断开并在固定延迟后重连。
//!
//! 请求通道只由同一任务的 `poll()` 消费，所以 rumqttc 链路一律用 `try_*` 入队，
//! 通道满视为本次请求失败，事件循环任务不会等待自己。

use crate::error::BusError;
use crate::filter::TopicFilter;
use crate::table::{MessageHandler, SubscriptionTable};
use async_trait::async_trait;
use edge_telemetry::record_publish;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 单次链路请求（订阅/发布/断开）的超时。
const LINK_TIMEOUT: Duration = Duration::from_secs(5);

/// 断开时等待 DISCONNECT 报文写出的上限。
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// 总线连接配置。
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub qos_subscribe: u8,
    pub qos_publish: u8,
}

/// 底层 MQTT 客户端的最小接口。
#[async_trait]
pub trait BusLink: Send + Sync {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BusError>;
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BusError>;
    async fn disconnect(&self) -> Result<(), BusError>;
}

#[async_trait]
impl BusLink for AsyncClient {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BusError> {
        AsyncClient::try_subscribe(self, filter, qos)
            .map_err(|err| BusError::Client(err.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        AsyncClient::try_publish(self, topic, qos, retain, payload)
            .map_err(|err| BusError::Client(err.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        AsyncClient::try_disconnect(self).map_err(|err| BusError::Client(err.to_string()))
    }
}

/// 发布接口（读数管道与状态发布依赖此抽象）。
#[async_trait]
pub trait Publisher: Send + Sync {
    /// 返回是否已在本地发出。
    async fn publish(&self, topic: &str, payload: &Value, retain: bool) -> bool;
}

/// 总线客户端。
pub struct BusClient {
    link: Arc<dyn BusLink>,
    eventloop: Mutex<Option<EventLoop>>,
    subscriptions: SubscriptionTable,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    stopping: AtomicBool,
    reconnect_delay: Duration,
    qos_subscribe: QoS,
    qos_publish: QoS,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl BusClient {
    /// 创建 rumqttc 客户端；网络连接在 `connect` 之后才建立。
    pub fn new(options: BusOptions) -> Arc<Self> {
        let mut mqtt = MqttOptions::new(options.client_id, options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(false);
        if let (Some(username), Some(password)) = (options.username, options.password) {
            mqtt.set_credentials(username, password);
        }
        let (client, eventloop) = AsyncClient::new(mqtt, 64);
        let bus = Self::build(
            Arc::new(client),
            options.reconnect_delay,
            options.qos_subscribe,
            options.qos_publish,
        );
        *bus.eventloop.lock().unwrap_or_else(|e| e.into_inner()) = Some(eventloop);
        Arc::new(bus)
    }

    /// 使用自定义链路（无事件循环，连接状态由 `handle_event` / `handle_connection_error` 驱动）。
    pub fn with_link(
        link: Arc<dyn BusLink>,
        reconnect_delay: Duration,
        qos_subscribe: u8,
        qos_publish: u8,
    ) -> Arc<Self> {
        Arc::new(Self::build(link, reconnect_delay, qos_subscribe, qos_publish))
    }

    fn build(
        link: Arc<dyn BusLink>,
        reconnect_delay: Duration,
        qos_subscribe: u8,
        qos_publish: u8,
    ) -> Self {
        Self {
            link,
            eventloop: Mutex::new(None),
            subscriptions: SubscriptionTable::new(),
            connected: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            reconnect_delay,
            qos_subscribe: qos_from_u8(qos_subscribe),
            qos_publish: qos_from_u8(qos_publish),
            driver: Mutex::new(None),
        }
    }

    /// 启动事件循环任务；连接失败只会触发重连调度，不向调用方返回错误。
    pub fn connect(self: &Arc<Self>) {
        let Some(mut eventloop) = self
            .eventloop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            debug!(target: "edge.bus", "bus_connect_ignored");
            return;
        };
        self.stopping.store(false, Ordering::SeqCst);
        info!(target: "edge.bus", "bus_connecting");
        let bus = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => {
                        if bus.stopping.load(Ordering::SeqCst) && is_disconnect_flushed(&event) {
                            break;
                        }
                        bus.handle_event(event).await;
                    }
                    Err(err) => {
                        if bus.stopping.load(Ordering::SeqCst) {
                            break;
                        }
                        // 返回后下一次 poll 即为重连尝试
                        bus.recover_from_error(&err.to_string()).await;
                    }
                }
            }
            debug!(target: "edge.bus", "bus_eventloop_stopped");
        });
        *self.driver.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// 主动断开并停止事件循环。
    ///
    /// DISCONNECT 入队后继续让事件循环把它写出，最多等待 `DISCONNECT_GRACE`，之后才终止任务。
    pub async fn disconnect(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            match tokio::time::timeout(LINK_TIMEOUT, self.link.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(target: "edge.bus", error = %err, "bus_disconnect_failed"),
                Err(_) => warn!(target: "edge.bus", "bus_disconnect_timeout"),
            }
        }
        let driver = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut handle) = driver {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!(target: "edge.bus", "bus_disconnect_not_flushed");
                handle.abort();
            }
        }
        info!(target: "edge.bus", "bus_disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// 注册过滤器与处理器；已连接时立即订阅，否则在下次连接成功时订阅。
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        let filter = TopicFilter::parse(pattern)?;
        self.subscriptions.insert(filter, handler);
        if self.is_connected() {
            self.request_subscribe(pattern).await?;
            info!(target: "edge.bus", pattern, "bus_subscribed");
        } else {
            info!(target: "edge.bus", pattern, "bus_subscription_deferred");
        }
        Ok(())
    }

    /// 断开时立即返回 false，不做任何 IO。
    pub async fn publish(&self, topic: &str, payload: &Value, retain: bool) -> bool {
        if !self.is_connected() {
            warn!(target: "edge.bus", topic, "bus_publish_skipped_disconnected");
            record_publish(false);
            return false;
        }
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(target: "edge.bus", topic, error = %err, "bus_payload_invalid");
                record_publish(false);
                return false;
            }
        };
        let size = bytes.len();
        let outcome = tokio::time::timeout(
            LINK_TIMEOUT,
            self.link.publish(topic, self.qos_publish, retain, bytes),
        )
        .await
        .unwrap_or_else(|_| Err(BusError::Client("publish timed out".to_string())));
        match outcome {
            Ok(()) => {
                info!(target: "edge.bus", topic, payload_size = size, "bus_published");
                record_publish(true);
                true
            }
            Err(err) => {
                error!(target: "edge.bus", topic, error = %err, "bus_publish_failed");
                record_publish(false);
                false
            }
        }
    }

    /// 处理一次事件循环输出。
    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    self.on_connected().await;
                } else {
                    self.handle_connection_error(&format!("connack refused: {:?}", ack.code));
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.dispatch(&publish.topic, &publish.payload).await;
            }
            Event::Incoming(Packet::Disconnect) => {
                self.handle_connection_error("broker sent disconnect");
            }
            _ => {}
        }
    }

    /// 标记断开并调度一次重连；返回本次是否新调度（已有待定重连时为 false）。
    pub fn handle_connection_error(&self, reason: &str) -> bool {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            warn!(target: "edge.bus", reason, "bus_connection_lost");
        }
        self.schedule_reconnect(reason)
    }

    /// 连接错误后的退避：调度重连，等待 `reconnect_delay`，再清除待定标记。
    ///
    /// 事件循环在返回后立即发起下一次连接尝试。
    pub async fn recover_from_error(&self, reason: &str) {
        self.handle_connection_error(reason);
        tokio::time::sleep(self.reconnect_delay).await;
        self.reconnecting.store(false, Ordering::SeqCst);
        info!(target: "edge.bus", "bus_reconnect_attempt");
    }

    fn schedule_reconnect(&self, reason: &str) -> bool {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(target: "edge.bus", reason, "bus_reconnect_already_pending");
            return false;
        }
        warn!(
            target: "edge.bus",
            reason,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "bus_reconnect_scheduled"
        );
        true
    }

    async fn on_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.reconnecting.store(false, Ordering::SeqCst);
        let patterns = self.subscriptions.patterns();
        info!(target: "edge.bus", subscriptions = patterns.len(), "bus_connected");
        for pattern in patterns {
            match self.request_subscribe(&pattern).await {
                Ok(()) => info!(target: "edge.bus", pattern = %pattern, "bus_resubscribed"),
                Err(err) => {
                    error!(target: "edge.bus", pattern = %pattern, error = %err, "bus_resubscribe_failed")
                }
            }
        }
    }

    async fn request_subscribe(&self, pattern: &str) -> Result<(), BusError> {
        tokio::time::timeout(LINK_TIMEOUT, self.link.subscribe(pattern, self.qos_subscribe))
            .await
            .unwrap_or_else(|_| Err(BusError::Client("subscribe timed out".to_string())))
    }

    /// 入站分发：无匹配或非法 JSON 记录后丢弃，处理器错误不影响连接。
    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(err) => {
                warn!(target: "edge.bus", topic, error = %err, "bus_message_invalid_json");
                return;
            }
        };
        let Some(handler) = self.subscriptions.lookup(topic) else {
            warn!(target: "edge.bus", topic, "bus_message_unrouted");
            return;
        };
        debug!(target: "edge.bus", topic, "bus_message_received");
        if let Err(err) = handler.handle(topic, value).await {
            error!(target: "edge.bus", topic, error = %err, "bus_handler_failed");
        }
    }
}

#[async_trait]
impl Publisher for BusClient {
    async fn publish(&self, topic: &str, payload: &Value, retain: bool) -> bool {
        BusClient::publish(self, topic, payload, retain).await
    }
}

/// DISCONNECT 报文已由事件循环写出。
fn is_disconnect_flushed(event: &Event) -> bool {
    matches!(event, Event::Outgoing(Outgoing::Disconnect))
}

pub(crate) fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_mapping_defaults_to_at_least_once() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_u8(9), QoS::AtLeastOnce);
    }

    #[test]
    fn only_outgoing_disconnect_ends_the_driver() {
        assert!(is_disconnect_flushed(&Event::Outgoing(Outgoing::Disconnect)));
        assert!(!is_disconnect_flushed(&Event::Outgoing(Outgoing::PingReq)));
        assert!(!is_disconnect_flushed(&Event::Incoming(Packet::Disconnect)));
    }
}
