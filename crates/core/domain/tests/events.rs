use chrono::{TimeZone, Utc};
use domain::{DeviceOfflineEvent, DeviceOnlineEvent, OfflineReason};

#[test]
fn online_event_payload() {
    let event = DeviceOnlineEvent {
        device_id: "550e8400".to_string(),
        device_identifier: "SENSOR-001".to_string(),
        occurred_at: Utc.with_ymd_and_hms(2025, 11, 29, 23, 45, 0).single().expect("ts"),
    };
    let payload = event.to_bus_payload();
    assert_eq!(payload["eventType"], "DEVICE_ONLINE");
    assert_eq!(payload["deviceIdentifier"], "SENSOR-001");
    assert_eq!(payload["occurredAt"], "2025-11-29T23:45:00Z");
}

#[test]
fn offline_event_payload_carries_reason_and_failures() {
    let event = DeviceOfflineEvent {
        device_id: "550e8400".to_string(),
        device_identifier: "SENSOR-001".to_string(),
        occurred_at: Utc::now(),
        reason: OfflineReason::PingFailed,
        consecutive_failures: 1,
    };
    let payload = event.to_bus_payload();
    assert_eq!(payload["eventType"], "DEVICE_OFFLINE");
    assert_eq!(payload["reason"], "PING_FAILED");
    assert_eq!(payload["consecutiveFailures"], 1);
}

#[test]
fn poll_failure_reason_serializes() {
    let value = serde_json::to_value(OfflineReason::PollFailed).expect("reason");
    assert_eq!(value, "POLL_FAILED");
}
