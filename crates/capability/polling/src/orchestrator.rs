//! 轮询编排器：后台循环按周期轮询全部设备，并在每轮开始前投递排队的阈值命令。
//!
//! 每一轮在独立任务中执行，单轮 panic 只会触发退避，不会终止循环。

use crate::error::PollingError;
use crate::poller::DevicePoller;
use domain::DeviceDescriptor;
use edge_registry::DeviceRegistry;
use edge_storage::DeviceIdentityLookup;
use edge_telemetry::{record_command_delivered, record_command_dropped, record_command_queued};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 调度参数。
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub interval: Duration,
    /// 每 N 轮强制重新加载设备清单
    pub reload_every_cycles: u64,
    pub stop_timeout: Duration,
    pub error_backoff: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            reload_every_cycles: 5,
            stop_timeout: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// 排队的阈值命令；`device_key` 可以是后端设备 ID，也可以是设备标识。
#[derive(Debug, Clone)]
struct QueuedCommand {
    device_key: String,
    threshold: f64,
}

struct Shared {
    registry: Arc<DeviceRegistry>,
    identities: Option<Arc<dyn DeviceIdentityLookup>>,
    poller: Arc<DevicePoller>,
    settings: OrchestratorSettings,
    cycles: AtomicU64,
    commands: AsyncMutex<mpsc::UnboundedReceiver<QueuedCommand>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PollingOrchestrator {
    shared: Arc<Shared>,
    sender: mpsc::UnboundedSender<QueuedCommand>,
    running: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl PollingOrchestrator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        poller: Arc<DevicePoller>,
        identities: Option<Arc<dyn DeviceIdentityLookup>>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                registry,
                identities,
                poller,
                settings,
                cycles: AtomicU64::new(0),
                commands: AsyncMutex::new(receiver),
            }),
            sender,
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// 启动后台循环；已在运行时记录警告并忽略。
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(target: "edge.polling", "polling_already_running");
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.shared.clone(), cancel.clone()));
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(Worker { cancel, handle });
        info!(
            target: "edge.polling",
            interval_secs = self.shared.settings.interval.as_secs_f64(),
            "polling_started"
        );
    }

    /// 请求停止并在 `stop_timeout` 内等待循环退出；超时后终止循环任务。
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!(target: "edge.polling", "polling_not_running");
            return;
        }
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(Worker { cancel, mut handle }) = worker else {
            return;
        };
        cancel.cancel();
        match tokio::time::timeout(self.shared.settings.stop_timeout, &mut handle).await {
            Ok(Ok(())) => info!(target: "edge.polling", "polling_stopped"),
            Ok(Err(err)) => error!(target: "edge.polling", error = %err, "polling_loop_join_failed"),
            Err(_) => {
                handle.abort();
                warn!(
                    target: "edge.polling",
                    timeout_secs = self.shared.settings.stop_timeout.as_secs_f64(),
                    "polling_stop_timed_out"
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 已开始的轮次数。
    pub fn cycle_count(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    /// 排队一条阈值命令，下一轮轮询前投递（至多一次）。
    pub fn enqueue_threshold_command(
        &self,
        device_key: impl Into<String>,
        threshold: f64,
    ) -> Result<(), PollingError> {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(PollingError::InvalidThreshold(threshold));
        }
        let command = QueuedCommand {
            device_key: device_key.into(),
            threshold,
        };
        info!(
            target: "edge.polling",
            device_key = %command.device_key,
            threshold,
            "threshold_command_queued"
        );
        self.sender
            .send(command)
            .map_err(|_| PollingError::QueueClosed)?;
        record_command_queued();
        Ok(())
    }
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    shared.reload_devices().await;
    while !cancel.is_cancelled() {
        let cycle = tokio::spawn(shared.clone().run_cycle(cancel.clone()));
        let pause = match cycle.await {
            Ok(()) => shared.settings.interval,
            Err(err) => {
                error!(target: "edge.polling", error = %err, "polling_cycle_failed");
                shared.settings.error_backoff
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    debug!(target: "edge.polling", "polling_loop_exited");
}

impl Shared {
    /// 设备清单读取是文件 IO，放到阻塞线程池执行。
    async fn reload_devices(&self) {
        let registry = self.registry.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || registry.load_devices(true)).await {
            error!(target: "edge.polling", error = %err, "device_reload_failed");
        }
    }

    async fn run_cycle(self: Arc<Self>, cancel: CancellationToken) {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        if cycle % self.settings.reload_every_cycles.max(1) == 0 {
            self.reload_devices().await;
        }
        let devices = self.registry.devices();
        debug!(target: "edge.polling", cycle, devices = devices.len(), "polling_cycle_started");

        self.drain_commands(&devices).await;

        if devices.is_empty() {
            warn!(target: "edge.polling", cycle, "polling_no_devices");
            return;
        }
        let mut succeeded = 0usize;
        for device in devices.iter().cloned() {
            if cancel.is_cancelled() {
                info!(target: "edge.polling", cycle, "polling_cycle_interrupted");
                break;
            }
            let poller = self.poller.clone();
            let target = device.clone();
            match tokio::spawn(async move { poller.poll_device(&target).await }).await {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(
                        target: "edge.polling",
                        device_identifier = %device.identifier,
                        error = %err,
                        "device_poll_panicked"
                    );
                    self.poller.mark_failed(&device).await;
                }
            }
        }
        info!(
            target: "edge.polling",
            cycle,
            devices = devices.len(),
            succeeded,
            "polling_cycle_completed"
        );
    }

    async fn drain_commands(&self, devices: &[DeviceDescriptor]) {
        let mut commands = self.commands.lock().await;
        while let Ok(command) = commands.try_recv() {
            let Some(device) = self.resolve_target(&command.device_key, devices).await else {
                warn!(
                    target: "edge.polling",
                    device_key = %command.device_key,
                    "threshold_command_unresolved"
                );
                record_command_dropped();
                continue;
            };
            if self.poller.send_threshold(&device, command.threshold).await {
                record_command_delivered();
            } else {
                record_command_dropped();
            }
        }
    }

    /// 先把后端设备 ID 解析为设备标识，再在清单中按精确匹配、子串匹配的顺序查找。
    async fn resolve_target(
        &self,
        device_key: &str,
        devices: &[DeviceDescriptor],
    ) -> Option<DeviceDescriptor> {
        let mut needle = device_key.to_string();
        if let Some(identities) = &self.identities {
            match identities.find_by_id(device_key).await {
                Ok(Some(identity)) => needle = identity.device_identifier,
                Ok(None) => {}
                Err(err) => warn!(
                    target: "edge.polling",
                    device_key,
                    error = %err,
                    "threshold_identity_lookup_failed"
                ),
            }
        }
        if needle.is_empty() {
            return None;
        }
        if let Some(device) = devices.iter().find(|device| device.identifier == needle) {
            return Some(device.clone());
        }
        // 清单标识与后端标识可能带有前后缀（如 "SENSOR-001" 与 "BT-SENSOR-001"）
        devices
            .iter()
            .find(|device| {
                device.identifier.contains(needle.as_str())
                    || needle.contains(device.identifier.as_str())
            })
            .cloned()
    }
}
