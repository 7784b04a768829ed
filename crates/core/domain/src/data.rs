use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// 告警类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    None,
    FullContainer,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::None => "NONE",
            AlertType::FullContainer => "FULL_CONTAINER",
        }
    }
}

/// 传感器读数（已校验）。
#[derive(Debug, Clone)]
pub struct SensorReading {
    pub reading_id: String,
    pub device_id: String,
    pub container_id: String,
    pub fill_level_percentage: f64,
    pub volume: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub is_alert: bool,
    pub alert_type: AlertType,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadingPayload<'a> {
    device_id: &'a str,
    container_id: &'a str,
    fill_level_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<f64>,
    recorded_at: String,
    received_at: String,
    is_alert: bool,
    alert_type: AlertType,
}

impl SensorReading {
    /// Backend 约定的读数结构（camelCase）。
    pub fn to_bus_payload(&self) -> serde_json::Value {
        let payload = ReadingPayload {
            device_id: &self.device_id,
            container_id: &self.container_id,
            fill_level_percentage: self.fill_level_percentage,
            volume: self.volume,
            recorded_at: iso(&self.recorded_at),
            received_at: iso(&self.received_at),
            is_alert: self.is_alert,
            alert_type: self.alert_type,
        };
        serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
    }
}

pub(crate) fn iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reading_payload_uses_backend_field_names() {
        let at = Utc.with_ymd_and_hms(2025, 11, 29, 23, 45, 0).single().expect("ts");
        let reading = SensorReading {
            reading_id: "r-1".to_string(),
            device_id: "dev-1".to_string(),
            container_id: "c-1".to_string(),
            fill_level_percentage: 78.5,
            volume: None,
            latitude: None,
            longitude: None,
            recorded_at: at,
            received_at: at,
            is_alert: true,
            alert_type: AlertType::FullContainer,
            synced: false,
        };
        let payload = reading.to_bus_payload();
        assert_eq!(payload["deviceId"], "dev-1");
        assert_eq!(payload["fillLevelPercentage"], 78.5);
        assert_eq!(payload["alertType"], "FULL_CONTAINER");
        assert_eq!(payload["recordedAt"], "2025-11-29T23:45:00Z");
        assert!(payload.get("volume").is_none());
    }
}
