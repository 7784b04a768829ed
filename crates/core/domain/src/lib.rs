pub mod data;
pub mod events;

pub use data::{AlertType, SensorReading};
pub use events::{DeviceOfflineEvent, DeviceOnlineEvent, OfflineReason};

/// 轮询设备描述：设备清单中的一项 + 运行时状态。
///
/// 不变量：`is_online == true` 时 `consecutive_failures == 0`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub identifier: String,
    pub port: String,
    pub is_online: bool,
    pub last_seen_at_ms: Option<i64>,
    pub consecutive_failures: u32,
}

impl DeviceDescriptor {
    /// 新加载的设备默认离线、无失败计数。
    pub fn new(identifier: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            port: port.into(),
            is_online: false,
            last_seen_at_ms: None,
            consecutive_failures: 0,
        }
    }

    /// 标记在线；返回此前是否离线（即是否发生边沿跳变）。
    pub fn mark_online(&mut self, now_ms: i64) -> bool {
        let was_offline = !self.is_online;
        self.is_online = true;
        self.last_seen_at_ms = Some(now_ms);
        self.consecutive_failures = 0;
        was_offline
    }

    /// 标记离线并累加失败次数；返回此前是否在线。
    pub fn mark_offline(&mut self) -> bool {
        let was_online = self.is_online;
        self.is_online = false;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        was_online
    }
}

/// 设备身份记录（由 Backend 下发，`cm/devices/events/created|updated`）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_identifier: String,
}

/// 容器阈值配置（`cm/containers/events/config/updated`）。
///
/// `sensor_id` 为绑定传感器的 `device_id`。
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub container_id: String,
    pub max_fill_level_threshold: f64,
    pub sensor_id: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ContainerConfig {
    pub fn is_full(&self, fill_level_percentage: f64) -> bool {
        fill_level_percentage >= self.max_fill_level_threshold
    }
}

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_resets_failures_and_stamps_last_seen() {
        let mut device = DeviceDescriptor::new("SENSOR-001", "COM4");
        assert!(!device.mark_offline());
        assert!(!device.mark_offline());
        assert_eq!(device.consecutive_failures, 2);

        assert!(device.mark_online(1_000));
        assert!(device.is_online);
        assert_eq!(device.consecutive_failures, 0);
        assert_eq!(device.last_seen_at_ms, Some(1_000));

        assert!(!device.mark_online(2_000));
        assert_eq!(device.last_seen_at_ms, Some(2_000));
    }

    #[test]
    fn container_full_at_threshold() {
        let config = ContainerConfig {
            container_id: "c-1".to_string(),
            max_fill_level_threshold: 80.0,
            sensor_id: "d-1".to_string(),
            updated_at: chrono::Utc::now(),
        };
        assert!(config.is_full(80.0));
        assert!(!config.is_full(79.9));
    }

    #[test]
    fn offline_edge_only_from_online() {
        let mut device = DeviceDescriptor::new("SENSOR-001", "COM4");
        device.mark_online(1);
        assert!(device.mark_offline());
        assert!(!device.mark_offline());
        assert_eq!(device.consecutive_failures, 2);
    }
}
