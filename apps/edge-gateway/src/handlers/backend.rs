//! Backend → Edge 总线事件：设备身份同步、容器阈值更新。
//!
//! 载荷无效时记录并返回 `BusError::Payload`，由总线客户端记日志后丢弃。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ContainerConfig, DeviceIdentity};
use edge_bus::{BusError, MessageHandler};
use edge_pipeline::parse_timestamp;
use edge_polling::{PollingError, PollingOrchestrator};
use edge_storage::{ContainerConfigStore, DeviceIdentityLookup};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// 阈值命令出口。
pub trait ThresholdSink: Send + Sync {
    fn enqueue_threshold(&self, device_key: &str, threshold: f64) -> Result<(), PollingError>;
}

impl ThresholdSink for PollingOrchestrator {
    fn enqueue_threshold(&self, device_key: &str, threshold: f64) -> Result<(), PollingError> {
        self.enqueue_threshold_command(device_key, threshold)
    }
}

/// `cm/devices/events/created|updated`：`{deviceId, deviceIdentifier, occurredAt}`。
pub struct DeviceEventHandler {
    identities: Arc<dyn DeviceIdentityLookup>,
}

impl DeviceEventHandler {
    pub fn new(identities: Arc<dyn DeviceIdentityLookup>) -> Self {
        Self { identities }
    }
}

#[async_trait]
impl MessageHandler for DeviceEventHandler {
    async fn handle(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let device_id = required_str(&payload, "deviceId")?;
        let device_identifier = required_str(&payload, "deviceIdentifier")?;
        occurred_at(&payload)?;

        self.identities
            .upsert(DeviceIdentity {
                device_id: device_id.to_string(),
                device_identifier: device_identifier.to_string(),
            })
            .await
            .map_err(|err| BusError::Handler(err.to_string()))?;
        info!(
            target: "edge.gateway",
            topic,
            device_id,
            device_identifier,
            "device_identity_synced"
        );
        Ok(())
    }
}

/// `cm/containers/events/config/updated`：
/// `{containerId, maxFillLevelThreshold, sensorId, occurredAt}`。
pub struct ContainerConfigHandler {
    containers: Arc<dyn ContainerConfigStore>,
    commands: Arc<dyn ThresholdSink>,
}

impl ContainerConfigHandler {
    pub fn new(containers: Arc<dyn ContainerConfigStore>, commands: Arc<dyn ThresholdSink>) -> Self {
        Self {
            containers,
            commands,
        }
    }
}

#[async_trait]
impl MessageHandler for ContainerConfigHandler {
    async fn handle(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let container_id = required_str(&payload, "containerId")?;
        let sensor_id = required_str(&payload, "sensorId")?;
        let threshold = threshold(&payload)?;
        let updated_at = occurred_at(&payload)?;

        self.containers
            .upsert(ContainerConfig {
                container_id: container_id.to_string(),
                max_fill_level_threshold: threshold,
                sensor_id: sensor_id.to_string(),
                updated_at,
            })
            .await
            .map_err(|err| BusError::Handler(err.to_string()))?;
        info!(
            target: "edge.gateway",
            topic,
            container_id,
            sensor_id,
            threshold,
            "container_config_synced"
        );

        self.commands
            .enqueue_threshold(sensor_id, threshold)
            .map_err(|err| BusError::Handler(err.to_string()))
    }
}

fn required_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str, BusError> {
    match payload.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(invalid(format!("missing field {key}"))),
    }
}

/// 数值或数字字符串，须在 0–100 之间。
fn threshold(payload: &Value) -> Result<f64, BusError> {
    let value = match payload.get("maxFillLevelThreshold") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(value) if (0.0..=100.0).contains(&value) => Ok(value),
        Some(value) => Err(invalid(format!("maxFillLevelThreshold out of range: {value}"))),
        None => Err(invalid("invalid maxFillLevelThreshold".to_string())),
    }
}

fn occurred_at(payload: &Value) -> Result<DateTime<Utc>, BusError> {
    payload
        .get("occurredAt")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .ok_or_else(|| invalid("invalid occurredAt".to_string()))
}

fn invalid(reason: String) -> BusError {
    warn!(target: "edge.gateway", reason = %reason, "backend_event_invalid");
    BusError::Payload(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_storage::{InMemoryContainerConfigStore, InMemoryIdentityStore};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        commands: Mutex<Vec<(String, f64)>>,
    }

    impl ThresholdSink for RecordingSink {
        fn enqueue_threshold(&self, device_key: &str, threshold: f64) -> Result<(), PollingError> {
            self.commands
                .lock()
                .expect("commands")
                .push((device_key.to_string(), threshold));
            Ok(())
        }
    }

    #[tokio::test]
    async fn device_event_upserts_identity() {
        let identities = Arc::new(InMemoryIdentityStore::new());
        let handler = DeviceEventHandler::new(identities.clone());

        handler
            .handle(
                "cm/devices/events/created",
                json!({
                    "deviceId": "550e8400-e29b-41d4-a716-446655440000",
                    "deviceIdentifier": "SENSOR-001",
                    "occurredAt": "2025-01-15T10:30:00"
                }),
            )
            .await
            .expect("handled");

        let identity = identities
            .find_by_identifier("SENSOR-001")
            .await
            .expect("lookup")
            .expect("identity");
        assert_eq!(identity.device_id, "550e8400-e29b-41d4-a716-446655440000");
    }

    #[tokio::test]
    async fn device_event_without_identifier_is_rejected() {
        let identities = Arc::new(InMemoryIdentityStore::new());
        let handler = DeviceEventHandler::new(identities.clone());

        let err = handler
            .handle(
                "cm/devices/events/created",
                json!({"deviceId": "dev-1", "occurredAt": "2025-01-15T10:30:00Z"}),
            )
            .await
            .expect_err("rejected");
        assert!(matches!(err, BusError::Payload(_)));
        assert!(identities.is_empty());
    }

    #[tokio::test]
    async fn config_update_stores_threshold_and_queues_command() {
        let containers = Arc::new(InMemoryContainerConfigStore::new());
        let sink = Arc::new(RecordingSink::default());
        let handler = ContainerConfigHandler::new(containers.clone(), sink.clone());

        handler
            .handle(
                "cm/containers/events/config/updated",
                json!({
                    "containerId": "container-7",
                    "maxFillLevelThreshold": "85.5",
                    "sensorId": "dev-1",
                    "occurredAt": "2025-01-15T10:30:00Z"
                }),
            )
            .await
            .expect("handled");

        let config = containers
            .find_by_sensor_id("dev-1")
            .await
            .expect("lookup")
            .expect("config");
        assert_eq!(config.container_id, "container-7");
        assert_eq!(config.max_fill_level_threshold, 85.5);
        assert_eq!(
            *sink.commands.lock().expect("commands"),
            vec![("dev-1".to_string(), 85.5)]
        );
    }

    #[tokio::test]
    async fn out_of_range_threshold_changes_nothing() {
        let containers = Arc::new(InMemoryContainerConfigStore::new());
        let sink = Arc::new(RecordingSink::default());
        let handler = ContainerConfigHandler::new(containers.clone(), sink.clone());

        let err = handler
            .handle(
                "cm/containers/events/config/updated",
                json!({
                    "containerId": "container-7",
                    "maxFillLevelThreshold": 150,
                    "sensorId": "dev-1",
                    "occurredAt": "2025-01-15T10:30:00Z"
                }),
            )
            .await
            .expect_err("rejected");
        assert!(matches!(err, BusError::Payload(_)));
        assert!(containers.find_by_id("container-7").await.expect("lookup").is_none());
        assert!(sink.commands.lock().expect("commands").is_empty());
    }
}
