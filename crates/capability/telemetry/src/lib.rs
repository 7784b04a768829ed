//! 追踪初始化、请求 ID 生成与进程计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照（/info 输出）。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub polls_succeeded: u64,
    pub polls_failed: u64,
    pub status_events: u64,
    pub publish_success: u64,
    pub publish_failure: u64,
    pub commands_queued: u64,
    pub commands_delivered: u64,
    pub commands_dropped: u64,
    pub readings_rejected: u64,
}

/// 进程计数器。
pub struct TelemetryMetrics {
    polls_succeeded: AtomicU64,
    polls_failed: AtomicU64,
    status_events: AtomicU64,
    publish_success: AtomicU64,
    publish_failure: AtomicU64,
    commands_queued: AtomicU64,
    commands_delivered: AtomicU64,
    commands_dropped: AtomicU64,
    readings_rejected: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            polls_succeeded: AtomicU64::new(0),
            polls_failed: AtomicU64::new(0),
            status_events: AtomicU64::new(0),
            publish_success: AtomicU64::new(0),
            publish_failure: AtomicU64::new(0),
            commands_queued: AtomicU64::new(0),
            commands_delivered: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            readings_rejected: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls_succeeded: self.polls_succeeded.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            status_events: self.status_events.load(Ordering::Relaxed),
            publish_success: self.publish_success.load(Ordering::Relaxed),
            publish_failure: self.publish_failure.load(Ordering::Relaxed),
            commands_queued: self.commands_queued.load(Ordering::Relaxed),
            commands_delivered: self.commands_delivered.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            readings_rejected: self.readings_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录单设备轮询结果。
pub fn record_poll(success: bool) {
    let metrics = metrics();
    if success {
        metrics.polls_succeeded.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.polls_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录上下线事件发布次数（仅边沿）。
pub fn record_status_event() {
    metrics().status_events.fetch_add(1, Ordering::Relaxed);
}

/// 记录总线发布结果。
pub fn record_publish(success: bool) {
    let metrics = metrics();
    if success {
        metrics.publish_success.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.publish_failure.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录阈值命令入队次数。
pub fn record_command_queued() {
    metrics().commands_queued.fetch_add(1, Ordering::Relaxed);
}

/// 记录阈值命令送达设备次数。
pub fn record_command_delivered() {
    metrics().commands_delivered.fetch_add(1, Ordering::Relaxed);
}

/// 记录无法解析目标或送达失败而丢弃的命令。
pub fn record_command_dropped() {
    metrics().commands_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录校验失败被拒绝的读数。
pub fn record_reading_rejected() {
    metrics().readings_rejected.fetch_add(1, Ordering::Relaxed);
}
