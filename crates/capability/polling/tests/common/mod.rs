#![allow(dead_code)]

use async_trait::async_trait;
use domain::{DeviceIdentity, DeviceOfflineEvent, DeviceOnlineEvent};
use edge_pipeline::ReadingProcessor;
use edge_polling::{DevicePoller, DeviceStatusTracker, StatusPublisher};
use edge_protocol::{PortOpener, PortPool, ProtocolError, SerialLink, SerialSettings};
use edge_registry::{DeviceRegistry, JsonFileSource};
use edge_storage::{DeviceIdentityLookup, InMemoryIdentityStore};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// 模拟传感器：记录收到的主题，按开关决定是否应答 ping / 读数请求。
pub struct SimulatedDevice {
    pub responsive: AtomicBool,
    received: Mutex<Vec<String>>,
}

impl SimulatedDevice {
    pub fn new(responsive: bool) -> Arc<Self> {
        Arc::new(Self {
            responsive: AtomicBool::new(responsive),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().expect("received").clone()
    }

    async fn serve(self: Arc<Self>, stream: DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let topic = serde_json::from_str::<Value>(&line)
                .ok()
                .and_then(|value| value["topic"].as_str().map(str::to_string))
                .unwrap_or_default();
            self.received.lock().expect("received").push(topic.clone());
            if !self.responsive.load(Ordering::SeqCst) {
                continue;
            }
            let reply = match topic.as_str() {
                "command/ping" => json!({"topic": "command/pong", "data": {}}),
                "request/current_reading" => {
                    json!({"topic": "response/current_reading", "data": {"pct": 42.0, "vol": 100.0}})
                }
                _ => continue,
            };
            if write
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

/// 端口 → 模拟设备；打开端口时启动应答任务。
#[derive(Default)]
pub struct SimulatedPorts {
    devices: HashMap<String, Arc<SimulatedDevice>>,
}

impl SimulatedPorts {
    pub fn with(mut self, port: &str, device: Arc<SimulatedDevice>) -> Self {
        self.devices.insert(port.to_string(), device);
        self
    }
}

impl PortOpener for SimulatedPorts {
    fn exists(&self, port: &str) -> bool {
        self.devices.contains_key(port)
    }

    fn open(
        &self,
        port: &str,
        _settings: &SerialSettings,
    ) -> Result<Box<dyn SerialLink>, ProtocolError> {
        let device = self
            .devices
            .get(port)
            .cloned()
            .ok_or_else(|| ProtocolError::PortNotFound(port.to_string()))?;
        let (ours, theirs) = duplex(4096);
        tokio::spawn(device.serve(theirs));
        Ok(Box::new(ours))
    }
}

/// 记录上下线事件。
#[derive(Default)]
pub struct RecordingStatus {
    pub online: Mutex<Vec<DeviceOnlineEvent>>,
    pub offline: Mutex<Vec<DeviceOfflineEvent>>,
}

impl RecordingStatus {
    pub fn online_count(&self) -> usize {
        self.online.lock().expect("online").len()
    }

    pub fn offline_events(&self) -> Vec<DeviceOfflineEvent> {
        self.offline.lock().expect("offline").clone()
    }
}

#[async_trait]
impl StatusPublisher for RecordingStatus {
    async fn publish_online(&self, event: &DeviceOnlineEvent) -> bool {
        self.online.lock().expect("online").push(event.clone());
        true
    }

    async fn publish_offline(&self, event: &DeviceOfflineEvent) -> bool {
        self.offline.lock().expect("offline").push(event.clone());
        true
    }
}

/// 可切换接受 / 拒绝的读数处理器；`panic` 模拟处理崩溃，`stall` 模拟处理卡死。
pub struct StubProcessor {
    pub accept: AtomicBool,
    pub panic: AtomicBool,
    pub stall: AtomicBool,
    pub seen: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl StubProcessor {
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(accept),
            panic: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().expect("seen").len()
    }
}

#[async_trait]
impl ReadingProcessor for StubProcessor {
    async fn process(&self, device_identifier: &str, data: &Map<String, Value>) -> bool {
        self.seen
            .lock()
            .expect("seen")
            .push((device_identifier.to_string(), data.clone()));
        if self.panic.load(Ordering::SeqCst) {
            panic!("reading processor crashed for {device_identifier}");
        }
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        self.accept.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    _dir: TempDir,
    pub devices_file: PathBuf,
    pub registry: Arc<DeviceRegistry>,
    pub identities: Arc<InMemoryIdentityStore>,
    pub status: Arc<RecordingStatus>,
    pub processor: Arc<StubProcessor>,
    pub poller: Arc<DevicePoller>,
}

/// 写入设备清单；`devices` 为 (标识, 端口)。
pub fn write_devices(path: &Path, devices: &[(&str, &str)]) {
    let entries: Vec<Value> = devices
        .iter()
        .map(|(identifier, port)| json!({"deviceIdentifier": identifier, "port": port}))
        .collect();
    std::fs::write(path, json!({ "devices": entries }).to_string()).expect("write devices");
}

/// `devices` 为 (标识, 端口)；`identities` 为 (设备 ID, 标识)。
pub async fn harness(
    ports: SimulatedPorts,
    devices: &[(&str, &str)],
    identities: &[(&str, &str)],
) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("bluetooth_devices.json");
    write_devices(&path, devices);
    let registry = Arc::new(DeviceRegistry::new(Box::new(JsonFileSource::new(
        path.clone(),
    ))));
    registry.load_devices(true);

    let store = Arc::new(InMemoryIdentityStore::new());
    for (device_id, identifier) in identities {
        store
            .upsert(DeviceIdentity {
                device_id: device_id.to_string(),
                device_identifier: identifier.to_string(),
            })
            .await
            .expect("upsert identity");
    }

    let status = Arc::new(RecordingStatus::default());
    let processor = StubProcessor::new(true);
    let tracker = Arc::new(DeviceStatusTracker::new(
        registry.clone(),
        store.clone(),
        status.clone(),
    ));
    let pool = Arc::new(PortPool::new(
        Arc::new(ports),
        SerialSettings {
            write_timeout: Duration::from_millis(200),
            lease_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    ));
    let poller = Arc::new(DevicePoller::new(
        pool,
        processor.clone(),
        tracker,
        RESPONSE_TIMEOUT,
    ));
    Harness {
        _dir: dir,
        devices_file: path,
        registry,
        identities: store,
        status,
        processor,
        poller,
    }
}

/// 轮询等待条件成立（最长 3 秒）。
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
