//! 读数处理管道：校验 → 落库 → 发布 → 标记已同步。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use domain::{AlertType, SensorReading};
use edge_bus::{Publisher, TOPIC_SENSOR_ALERT_FULL, TOPIC_SENSOR_READINGS_BATCH};
use edge_storage::{ContainerConfigStore, DeviceIdentityLookup, ReadingStore};
use edge_telemetry::record_reading_rejected;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 无容器配置时使用的容器 ID
pub const DEFAULT_CONTAINER_ID: &str = "default-container-001";

/// 管道处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// 读数处理器：轮询成功拿到读数后调用，返回是否已持久化。
#[async_trait]
pub trait ReadingProcessor: Send + Sync {
    async fn process(&self, device_identifier: &str, data: &Map<String, Value>) -> bool;
}

/// 读数管道。
pub struct ReadingPipeline {
    identities: Arc<dyn DeviceIdentityLookup>,
    containers: Arc<dyn ContainerConfigStore>,
    readings: Arc<dyn ReadingStore>,
    publisher: Arc<dyn Publisher>,
}

impl ReadingPipeline {
    pub fn new(
        identities: Arc<dyn DeviceIdentityLookup>,
        containers: Arc<dyn ContainerConfigStore>,
        readings: Arc<dyn ReadingStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            identities,
            containers,
            readings,
            publisher,
        }
    }

    /// 处理一条设备读数，返回落库后的读数（`synced` 反映发布结果）。
    pub async fn ingest(
        &self,
        device_identifier: &str,
        data: &Map<String, Value>,
    ) -> Result<SensorReading, PipelineError> {
        let identity = self
            .identities
            .find_by_identifier(device_identifier)
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?
            .ok_or_else(|| PipelineError::UnknownDevice(device_identifier.to_string()))?;

        let fields = SensorFields::parse(data)?;
        let config = self
            .containers
            .find_by_sensor_id(&identity.device_id)
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;
        let container_id = match &config {
            Some(config) => config.container_id.clone(),
            None => {
                warn!(
                    target: "edge.pipeline",
                    device_identifier,
                    container_id = DEFAULT_CONTAINER_ID,
                    "container_config_missing"
                );
                DEFAULT_CONTAINER_ID.to_string()
            }
        };
        // 设备自带告警标志优先，否则按容器阈值判断
        let is_alert = fields.alert.unwrap_or_else(|| {
            config
                .as_ref()
                .map(|config| config.is_full(fields.fill_level_percentage))
                .unwrap_or(false)
        });

        let reading = SensorReading {
            reading_id: uuid::Uuid::new_v4().to_string(),
            device_id: identity.device_id.clone(),
            container_id,
            fill_level_percentage: fields.fill_level_percentage,
            volume: fields.volume,
            latitude: fields.latitude,
            longitude: fields.longitude,
            recorded_at: fields.recorded_at.unwrap_or_else(Utc::now),
            received_at: Utc::now(),
            is_alert,
            alert_type: if is_alert {
                AlertType::FullContainer
            } else {
                AlertType::None
            },
            synced: false,
        };

        let mut saved = self
            .readings
            .save(reading)
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;
        info!(
            target: "edge.pipeline",
            device_identifier,
            reading_id = %saved.reading_id,
            container_id = %saved.container_id,
            fill_level_percentage = saved.fill_level_percentage,
            is_alert = saved.is_alert,
            "reading_saved"
        );

        if self.publish_reading(&saved).await {
            saved.synced = self.mark_synced(&saved.reading_id).await;
        }
        Ok(saved)
    }

    /// 重新发布未同步的读数：告警逐条，普通读数合并为一批。返回标记为已同步的条数。
    pub async fn sync_pending(&self, limit: usize) -> usize {
        let pending = match self.readings.list_pending_sync(limit).await {
            Ok(pending) => pending,
            Err(err) => {
                error!(target: "edge.pipeline", error = %err, "pending_readings_unavailable");
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }
        let (alerts, normal): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|reading| reading.is_alert);
        let mut synced = 0;
        for alert in &alerts {
            if !self.publish_alert(alert).await {
                // 总线不可用时不再继续
                info!(target: "edge.pipeline", synced, "reading_sync_interrupted");
                return synced;
            }
            if self.mark_synced(&alert.reading_id).await {
                synced += 1;
            }
        }
        if !normal.is_empty() && self.publish_batch(&normal).await {
            for reading in &normal {
                if self.mark_synced(&reading.reading_id).await {
                    synced += 1;
                }
            }
        }
        info!(
            target: "edge.pipeline",
            alerts = alerts.len(),
            normal = normal.len(),
            synced,
            "reading_sync_finished"
        );
        synced
    }

    async fn publish_reading(&self, reading: &SensorReading) -> bool {
        if reading.is_alert {
            self.publish_alert(reading).await
        } else {
            self.publish_batch(std::slice::from_ref(reading)).await
        }
    }

    async fn publish_alert(&self, reading: &SensorReading) -> bool {
        let payload = alert_payload(reading, Utc::now());
        self.publisher
            .publish(TOPIC_SENSOR_ALERT_FULL, &payload, false)
            .await
    }

    async fn publish_batch(&self, readings: &[SensorReading]) -> bool {
        let payload = batch_payload(readings, Utc::now());
        self.publisher
            .publish(TOPIC_SENSOR_READINGS_BATCH, &payload, false)
            .await
    }

    async fn mark_synced(&self, reading_id: &str) -> bool {
        match self.readings.mark_synced(reading_id).await {
            Ok(found) => found,
            Err(err) => {
                error!(target: "edge.pipeline", reading_id, error = %err, "reading_mark_synced_failed");
                false
            }
        }
    }
}

#[async_trait]
impl ReadingProcessor for ReadingPipeline {
    async fn process(&self, device_identifier: &str, data: &Map<String, Value>) -> bool {
        match self.ingest(device_identifier, data).await {
            Ok(_) => true,
            Err(PipelineError::UnknownDevice(identifier)) => {
                warn!(
                    target: "edge.pipeline",
                    device_identifier = %identifier,
                    "device_identity_missing_sync_from_backend_first"
                );
                false
            }
            Err(err) => {
                record_reading_rejected();
                error!(target: "edge.pipeline", device_identifier, error = %err, "reading_rejected");
                false
            }
        }
    }
}

/// 传感器响应字段：`{pct, vol, ale, lat, lon, timestamp?}`。
#[derive(Debug, Clone, PartialEq)]
struct SensorFields {
    fill_level_percentage: f64,
    volume: Option<f64>,
    alert: Option<bool>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    recorded_at: Option<DateTime<Utc>>,
}

impl SensorFields {
    fn parse(data: &Map<String, Value>) -> Result<Self, PipelineError> {
        let fill_level_percentage = data
            .get("pct")
            .and_then(Value::as_f64)
            .ok_or_else(|| PipelineError::InvalidReading("pct missing or not numeric".to_string()))?;
        if !(0.0..=100.0).contains(&fill_level_percentage) {
            return Err(PipelineError::InvalidReading(format!(
                "pct out of range: {fill_level_percentage}"
            )));
        }
        Ok(Self {
            fill_level_percentage,
            volume: data.get("vol").and_then(Value::as_f64),
            alert: data.get("ale").and_then(Value::as_bool),
            latitude: data.get("lat").and_then(Value::as_f64),
            longitude: data.get("lon").and_then(Value::as_f64),
            recorded_at: data
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
        })
    }
}

/// 不带时区的 ISO-8601 形式（`T` 或空格分隔，秒可省略）。
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// ISO-8601；不带时区时按 UTC 处理，无法解析时返回 `None`。
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // 空格分隔但带偏移，如 "2025-11-29 23:45:00+05:00"
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// `cm/sensors/alerts/full` 载荷。
pub fn alert_payload(reading: &SensorReading, published_at: DateTime<Utc>) -> Value {
    json!({
        "eventType": "SENSOR_ALERT",
        "alertType": reading.alert_type.as_str(),
        "reading": reading.to_bus_payload(),
        "publishedAt": published_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

/// `cm/sensors/readings/batch` 载荷。
pub fn batch_payload(readings: &[SensorReading], published_at: DateTime<Utc>) -> Value {
    json!({
        "eventType": "SENSOR_READING_BATCH",
        "count": readings.len(),
        "readings": readings.iter().map(SensorReading::to_bus_payload).collect::<Vec<_>>(),
        "publishedAt": published_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn parses_sensor_fields() {
        let fields = SensorFields::parse(&data(json!({
            "pct": 78.5, "vol": 12.0, "ale": true, "lat": -12.04, "lon": -77.03,
            "timestamp": "2025-11-29T23:45:00"
        })))
        .expect("fields");
        assert_eq!(fields.fill_level_percentage, 78.5);
        assert_eq!(fields.alert, Some(true));
        assert_eq!(
            fields.recorded_at.map(|ts| ts.to_rfc3339()),
            Some("2025-11-29T23:45:00+00:00".to_string())
        );
    }

    #[test]
    fn rejects_bad_fill_level() {
        assert!(SensorFields::parse(&data(json!({"pct": 150.0}))).is_err());
        assert!(SensorFields::parse(&data(json!({"pct": "full"}))).is_err());
        assert!(SensorFields::parse(&data(json!({"vol": 1.0}))).is_err());
    }

    #[test]
    fn timestamp_variants() {
        assert!(parse_timestamp("2025-11-29T23:45:00Z").is_some());
        assert!(parse_timestamp("2025-11-29T23:45:00.250").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn timestamp_without_seconds_or_with_space_separator() {
        let expected = Some("2025-11-29T23:45:00+00:00".to_string());
        for raw in [
            "2025-11-29T23:45",
            "2025-11-29 23:45",
            "2025-11-29 23:45:00",
            "2025-11-29 23:45:00.000",
            "2025-11-30 04:45:00+05:00",
        ] {
            assert_eq!(parse_timestamp(raw).map(|ts| ts.to_rfc3339()), expected, "{raw}");
        }
        assert!(parse_timestamp("2025-11-29").is_none());
        assert!(parse_timestamp("2025-11-29 25:00").is_none());
    }
}
