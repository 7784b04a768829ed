//! 设备命令协议：ping / 读数请求 / 阈值 / 上报间隔 / 复位。
//!
//! 调用方须持有该端口的租约；所有方法都把失败折叠为 `false` / `None` 并记录日志。

use crate::envelope::{Envelope, Topic};
use crate::transport::Transport;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// 单次行读取的最长等待
const LINE_WAIT: Duration = Duration::from_secs(1);
/// 读失败或对端关闭后的让步间隔
const RETRY_PAUSE: Duration = Duration::from_millis(100);

/// 设备命令客户端（借用一个已租用的传输适配器）。
pub struct CommandClient<'a> {
    transport: &'a mut Transport,
    response_timeout: Duration,
}

impl<'a> CommandClient<'a> {
    pub fn new(transport: &'a mut Transport, response_timeout: Duration) -> Self {
        Self {
            transport,
            response_timeout,
        }
    }

    /// 发送 ping 并等待 pong。
    pub async fn ping(&mut self) -> bool {
        self.send_and_wait(Envelope::new(Topic::Ping), Topic::Pong)
            .await
            .is_some()
    }

    /// 请求当前读数；超时或 `data` 为空对象时返回 `None`。
    pub async fn request_current_reading(&mut self) -> Option<Map<String, Value>> {
        let response = self
            .send_and_wait(
                Envelope::new(Topic::RequestCurrentReading),
                Topic::ResponseCurrentReading,
            )
            .await?;
        if response.data.is_empty() {
            warn!(
                target: "edge.protocol",
                port = %self.transport.port(),
                "current_reading_empty"
            );
            return None;
        }
        Some(response.data)
    }

    /// 下发满溢阈值（0–100），越界不产生任何 IO。
    pub async fn set_threshold(&mut self, threshold: f64) -> bool {
        if !(0.0..=100.0).contains(&threshold) {
            error!(target: "edge.protocol", threshold, "threshold_out_of_range");
            return false;
        }
        let mut data = Map::new();
        data.insert("value".to_string(), json!(threshold));
        self.send(Envelope::with_data(Topic::ConfigThreshold, data))
            .await
    }

    /// 设置设备上报间隔（秒，≥1）。
    pub async fn set_interval(&mut self, seconds: u32) -> bool {
        if seconds < 1 {
            error!(target: "edge.protocol", seconds, "interval_out_of_range");
            return false;
        }
        let mut data = Map::new();
        data.insert("seconds".to_string(), json!(seconds));
        self.send(Envelope::with_data(Topic::ConfigInterval, data))
            .await
    }

    pub async fn reset(&mut self) -> bool {
        self.send(Envelope::new(Topic::Reset)).await
    }

    async fn send(&mut self, envelope: Envelope) -> bool {
        match self.transport.send_envelope(&envelope).await {
            Ok(()) => true,
            Err(err) => {
                error!(
                    target: "edge.protocol",
                    port = %self.transport.port(),
                    topic = envelope.topic.as_str(),
                    error = %err,
                    "serial_send_failed"
                );
                false
            }
        }
    }

    /// 发送请求并在超时窗口内等待期望主题的响应。
    async fn send_and_wait(&mut self, request: Envelope, expected: Topic) -> Option<Envelope> {
        if !self.send(request).await {
            return None;
        }
        let deadline = Instant::now() + self.response_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.transport.read_line(remaining.min(LINE_WAIT)).await {
                Ok(Some(line)) => {
                    if let Some(envelope) = self.inspect_line(&line) {
                        if envelope.topic == expected {
                            return Some(envelope);
                        }
                        debug!(
                            target: "edge.protocol",
                            port = %self.transport.port(),
                            topic = envelope.topic.as_str(),
                            expected = expected.as_str(),
                            "serial_envelope_ignored"
                        );
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(
                        target: "edge.protocol",
                        port = %self.transport.port(),
                        error = %err,
                        "serial_read_failed"
                    );
                    sleep(RETRY_PAUSE.min(deadline.saturating_duration_since(Instant::now())))
                        .await;
                }
            }
        }
        warn!(
            target: "edge.protocol",
            port = %self.transport.port(),
            expected = expected.as_str(),
            "serial_response_timeout"
        );
        None
    }

    /// 非 JSON 行是设备诊断输出，记录后跳过。
    fn inspect_line(&self, line: &str) -> Option<Envelope> {
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('{') {
            info!(
                target: "edge.protocol",
                port = %self.transport.port(),
                line,
                "device_diagnostic"
            );
            return None;
        }
        match Envelope::decode(line) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                warn!(
                    target: "edge.protocol",
                    port = %self.transport.port(),
                    error = %err,
                    "serial_envelope_invalid"
                );
                None
            }
        }
    }
}
