//! 单设备轮询：租用端口 → ping → 读数 → 处理管道 → 更新状态。
//!
//! 端口只在协议交互期间被租用，处理与发布在释放租约之后进行。

use crate::tracker::DeviceStatusTracker;
use domain::{DeviceDescriptor, OfflineReason};
use edge_pipeline::ReadingProcessor;
use edge_protocol::{CommandClient, PortPool};
use edge_telemetry::record_poll;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

enum Exchange {
    Reading(Map<String, Value>),
    Failed(OfflineReason),
}

pub struct DevicePoller {
    pool: Arc<PortPool>,
    processor: Arc<dyn ReadingProcessor>,
    tracker: Arc<DeviceStatusTracker>,
    response_timeout: Duration,
}

impl DevicePoller {
    pub fn new(
        pool: Arc<PortPool>,
        processor: Arc<dyn ReadingProcessor>,
        tracker: Arc<DeviceStatusTracker>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            processor,
            tracker,
            response_timeout,
        }
    }

    /// 轮询一台设备；返回是否成功拿到并处理了读数。
    pub async fn poll_device(&self, device: &DeviceDescriptor) -> bool {
        let identifier = device.identifier.as_str();
        debug!(target: "edge.polling", device_identifier = identifier, port = %device.port, "device_poll_started");

        match self.exchange(device).await {
            Exchange::Failed(reason) => {
                warn!(
                    target: "edge.polling",
                    device_identifier = identifier,
                    port = %device.port,
                    reason = ?reason,
                    "device_poll_failed"
                );
                self.tracker.mark_offline(identifier, reason).await;
                record_poll(false);
                false
            }
            Exchange::Reading(data) => {
                if self.processor.process(identifier, &data).await {
                    self.tracker.mark_online(identifier).await;
                    record_poll(true);
                    true
                } else {
                    record_poll(false);
                    false
                }
            }
        }
    }

    /// 轮询任务异常终止时记一次失败（与普通失败同样计入连续失败次数）。
    pub async fn mark_failed(&self, device: &DeviceDescriptor) {
        self.tracker
            .mark_offline(&device.identifier, OfflineReason::PollFailed)
            .await;
        record_poll(false);
    }

    async fn exchange(&self, device: &DeviceDescriptor) -> Exchange {
        let mut lease = match self.pool.lease(&device.port).await {
            Ok(lease) => lease,
            Err(err) => {
                warn!(
                    target: "edge.polling",
                    device_identifier = %device.identifier,
                    port = %device.port,
                    error = %err,
                    "port_unavailable"
                );
                return Exchange::Failed(OfflineReason::PortUnavailable);
            }
        };
        let mut client = CommandClient::new(&mut lease, self.response_timeout);
        if !client.ping().await {
            return Exchange::Failed(OfflineReason::PingFailed);
        }
        match client.request_current_reading().await {
            Some(data) => Exchange::Reading(data),
            None => Exchange::Failed(OfflineReason::NoReading),
        }
    }

    /// 在设备端口的租约内下发满溢阈值。
    pub async fn send_threshold(&self, device: &DeviceDescriptor, threshold: f64) -> bool {
        let mut lease = match self.pool.lease(&device.port).await {
            Ok(lease) => lease,
            Err(err) => {
                error!(
                    target: "edge.polling",
                    device_identifier = %device.identifier,
                    port = %device.port,
                    error = %err,
                    "threshold_port_unavailable"
                );
                return false;
            }
        };
        let sent = CommandClient::new(&mut lease, self.response_timeout)
            .set_threshold(threshold)
            .await;
        if sent {
            info!(
                target: "edge.polling",
                device_identifier = %device.identifier,
                threshold,
                "threshold_sent"
            );
        } else {
            error!(
                target: "edge.polling",
                device_identifier = %device.identifier,
                threshold,
                "threshold_send_failed"
            );
        }
        sent
    }
}
