//! # 设备注册表
//!
//! 从设备清单加载轮询目标，按修改时间检测变更并热重载。
//! 重载时原地合并：已存在设备保留运行时状态（在线、失败计数），仅更新端口；
//! 清单中消失的设备被移除。来源缺失或损坏时保留上一次成功加载的结果。

mod source;

pub use source::{DeviceEntry, DeviceListSource, JsonFileSource, RegistryError};

use domain::DeviceDescriptor;
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{error, info, warn};

#[derive(Default)]
struct RegistryState {
    devices: Vec<DeviceDescriptor>,
    last_modified: Option<SystemTime>,
}

/// 设备注册表（设备描述的唯一持有者）。
pub struct DeviceRegistry {
    source: Box<dyn DeviceListSource>,
    state: Mutex<RegistryState>,
}

impl DeviceRegistry {
    pub fn new(source: Box<dyn DeviceListSource>) -> Self {
        Self {
            source,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// 加载设备清单；未变更且未强制时直接返回缓存。
    ///
    /// 来源读取在锁外进行，锁只在比较修改时间与合并结果时持有。
    pub fn load_devices(&self, force_reload: bool) -> Vec<DeviceDescriptor> {
        let modified = match self.source.modified() {
            Ok(modified) => modified,
            Err(err) => {
                error!(
                    target: "edge.registry",
                    source = %self.source.describe(),
                    error = %err,
                    "device_list_unavailable"
                );
                return self.devices();
            }
        };
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !force_reload && state.last_modified == Some(modified) {
                return state.devices.clone();
            }
        }

        let entries = match self.source.load() {
            Ok(entries) => entries,
            Err(err) => {
                error!(
                    target: "edge.registry",
                    source = %self.source.describe(),
                    error = %err,
                    "device_list_invalid"
                );
                return self.devices();
            }
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.devices = merge(&state.devices, entries);
        state.last_modified = Some(modified);
        info!(
            target: "edge.registry",
            source = %self.source.describe(),
            count = state.devices.len(),
            "device_list_loaded"
        );
        state.devices.clone()
    }

    /// 来源修改时间变化时强制重载；返回是否重载。
    pub fn reload_if_changed(&self) -> bool {
        let Ok(modified) = self.source.modified() else {
            return false;
        };
        let changed = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.last_modified != Some(modified)
        };
        if changed {
            info!(target: "edge.registry", "device_list_changed");
            self.load_devices(true);
        }
        changed
    }

    pub fn get_device(&self, identifier: &str) -> Option<DeviceDescriptor> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .devices
            .iter()
            .find(|device| device.identifier == identifier)
            .cloned()
    }

    /// 当前缓存的设备（不触发读取）。
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .devices
            .clone()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .devices
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 在锁内修改一台设备的运行时状态；设备不存在时返回 `None`。
    pub fn update<R>(
        &self,
        identifier: &str,
        apply: impl FnOnce(&mut DeviceDescriptor) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .devices
            .iter_mut()
            .find(|device| device.identifier == identifier)
            .map(apply)
    }
}

fn merge(existing: &[DeviceDescriptor], entries: Vec<DeviceEntry>) -> Vec<DeviceDescriptor> {
    let mut merged: Vec<DeviceDescriptor> = Vec::with_capacity(entries.len());
    for entry in entries {
        let (identifier, port) = match (entry.identifier, entry.port) {
            (Some(identifier), Some(port)) if !identifier.is_empty() && !port.is_empty() => {
                (identifier, port)
            }
            (identifier, port) => {
                warn!(
                    target: "edge.registry",
                    identifier = ?identifier,
                    port = ?port,
                    "device_entry_invalid"
                );
                continue;
            }
        };

        // 重复标识：后者覆盖端口，位置保持首次出现处
        if let Some(device) = merged.iter_mut().find(|d| d.identifier == identifier) {
            device.port = port;
            continue;
        }

        let device = match existing.iter().find(|d| d.identifier == identifier) {
            Some(previous) => {
                let mut device = previous.clone();
                device.port = port;
                device
            }
            None => DeviceDescriptor::new(identifier, port),
        };
        merged.push(device);
    }
    merged
}
