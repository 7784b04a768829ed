//! 运维端点：健康检查与运行信息。

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use edge_telemetry::metrics;
use serde_json::{Value, json};

/// 总线已连接且轮询在运行时为 healthy，否则 degraded（503）。
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = health_report(state.bus.is_connected(), state.orchestrator.is_running());
    (status, Json(body))
}

pub async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = metrics().snapshot();
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "pollingRunning": state.orchestrator.is_running(),
        "cycleCount": state.orchestrator.cycle_count(),
        "devices": state.registry.len(),
        "openPorts": state.pool.open_ports(),
        "busConnected": state.bus.is_connected(),
        "metrics": {
            "pollsSucceeded": snapshot.polls_succeeded,
            "pollsFailed": snapshot.polls_failed,
            "statusEvents": snapshot.status_events,
            "publishSuccess": snapshot.publish_success,
            "publishFailure": snapshot.publish_failure,
            "commandsQueued": snapshot.commands_queued,
            "commandsDelivered": snapshot.commands_delivered,
            "commandsDropped": snapshot.commands_dropped,
            "readingsRejected": snapshot.readings_rejected,
        },
    }))
}

fn health_report(bus_connected: bool, polling_running: bool) -> (StatusCode, Value) {
    let healthy = bus_connected && polling_running;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "busConnected": bus_connected,
            "pollingRunning": polling_running,
        }),
    )
}
