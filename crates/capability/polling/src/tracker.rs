//! 设备上下线状态机：只在边沿（离线→在线、在线→离线）发布事件。

use async_trait::async_trait;
use chrono::Utc;
use domain::{DeviceOfflineEvent, DeviceOnlineEvent, OfflineReason, now_epoch_ms};
use edge_bus::Publisher;
use edge_registry::DeviceRegistry;
use edge_storage::DeviceIdentityLookup;
use edge_telemetry::record_status_event;
use std::sync::Arc;
use tracing::{info, warn};

/// 上下线事件发布接口。
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish_online(&self, event: &DeviceOnlineEvent) -> bool;
    async fn publish_offline(&self, event: &DeviceOfflineEvent) -> bool;
}

/// 发布到 `cm/devices/events/online|offline`。
pub struct BusStatusPublisher {
    publisher: Arc<dyn Publisher>,
}

impl BusStatusPublisher {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl StatusPublisher for BusStatusPublisher {
    async fn publish_online(&self, event: &DeviceOnlineEvent) -> bool {
        self.publisher
            .publish(DeviceOnlineEvent::TOPIC, &event.to_bus_payload(), false)
            .await
    }

    async fn publish_offline(&self, event: &DeviceOfflineEvent) -> bool {
        self.publisher
            .publish(DeviceOfflineEvent::TOPIC, &event.to_bus_payload(), false)
            .await
    }
}

/// 状态跟踪器：设备描述只经由这里修改。
pub struct DeviceStatusTracker {
    registry: Arc<DeviceRegistry>,
    identities: Arc<dyn DeviceIdentityLookup>,
    publisher: Arc<dyn StatusPublisher>,
}

impl DeviceStatusTracker {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        identities: Arc<dyn DeviceIdentityLookup>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            registry,
            identities,
            publisher,
        }
    }

    /// 标记在线；返回是否发生了离线→在线跳变。
    pub async fn mark_online(&self, identifier: &str) -> bool {
        let Some(was_offline) = self
            .registry
            .update(identifier, |device| device.mark_online(now_epoch_ms()))
        else {
            warn!(target: "edge.polling", device_identifier = identifier, "device_not_registered");
            return false;
        };
        if !was_offline {
            return false;
        }
        info!(target: "edge.polling", device_identifier = identifier, "device_online");
        if let Some(device_id) = self.resolve_device_id(identifier).await {
            let event = DeviceOnlineEvent {
                device_id,
                device_identifier: identifier.to_string(),
                occurred_at: Utc::now(),
            };
            if self.publisher.publish_online(&event).await {
                record_status_event();
            }
        }
        true
    }

    /// 标记离线并累加失败次数；返回是否发生了在线→离线跳变。
    pub async fn mark_offline(&self, identifier: &str, reason: OfflineReason) -> bool {
        let Some((was_online, failures)) = self.registry.update(identifier, |device| {
            let was_online = device.mark_offline();
            (was_online, device.consecutive_failures)
        }) else {
            warn!(target: "edge.polling", device_identifier = identifier, "device_not_registered");
            return false;
        };
        if !was_online {
            return false;
        }
        warn!(
            target: "edge.polling",
            device_identifier = identifier,
            reason = ?reason,
            consecutive_failures = failures,
            "device_offline"
        );
        if let Some(device_id) = self.resolve_device_id(identifier).await {
            let event = DeviceOfflineEvent {
                device_id,
                device_identifier: identifier.to_string(),
                occurred_at: Utc::now(),
                reason,
                consecutive_failures: failures,
            };
            if self.publisher.publish_offline(&event).await {
                record_status_event();
            }
        }
        true
    }

    async fn resolve_device_id(&self, identifier: &str) -> Option<String> {
        match self.identities.find_by_identifier(identifier).await {
            Ok(Some(identity)) => Some(identity.device_id),
            Ok(None) => {
                warn!(
                    target: "edge.polling",
                    device_identifier = identifier,
                    "status_event_skipped_identity_missing"
                );
                None
            }
            Err(err) => {
                warn!(
                    target: "edge.polling",
                    device_identifier = identifier,
                    error = %err,
                    "status_event_skipped_identity_lookup_failed"
                );
                None
            }
        }
    }
}
