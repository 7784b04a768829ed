//! 设备上下线事件（边沿触发，发布到 `cm/devices/events/online|offline`）。

use crate::data::iso;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// 离线原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfflineReason {
    /// 端口不存在或打开失败
    PortUnavailable,
    /// ping 无 pong
    PingFailed,
    /// 读数请求超时或为空
    NoReading,
    /// 轮询任务异常终止
    PollFailed,
}

#[derive(Debug, Clone)]
pub struct DeviceOnlineEvent {
    pub device_id: String,
    pub device_identifier: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeviceOfflineEvent {
    pub device_id: String,
    pub device_identifier: String,
    pub occurred_at: DateTime<Utc>,
    pub reason: OfflineReason,
    pub consecutive_failures: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OnlinePayload<'a> {
    event_type: &'static str,
    device_id: &'a str,
    device_identifier: &'a str,
    occurred_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OfflinePayload<'a> {
    event_type: &'static str,
    device_id: &'a str,
    device_identifier: &'a str,
    occurred_at: String,
    reason: OfflineReason,
    consecutive_failures: u32,
}

impl DeviceOnlineEvent {
    pub const TOPIC: &'static str = "cm/devices/events/online";

    pub fn to_bus_payload(&self) -> serde_json::Value {
        serde_json::to_value(OnlinePayload {
            event_type: "DEVICE_ONLINE",
            device_id: &self.device_id,
            device_identifier: &self.device_identifier,
            occurred_at: iso(&self.occurred_at),
        })
        .unwrap_or(serde_json::Value::Null)
    }
}

impl DeviceOfflineEvent {
    pub const TOPIC: &'static str = "cm/devices/events/offline";

    pub fn to_bus_payload(&self) -> serde_json::Value {
        serde_json::to_value(OfflinePayload {
            event_type: "DEVICE_OFFLINE",
            device_id: &self.device_id,
            device_identifier: &self.device_identifier,
            occurred_at: iso(&self.occurred_at),
            reason: self.reason,
            consecutive_failures: self.consecutive_failures,
        })
        .unwrap_or(serde_json::Value::Null)
    }
}
