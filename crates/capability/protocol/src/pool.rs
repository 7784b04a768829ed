//! 端口池：每个串口一条长连接 + 一把异步互斥锁。
//!
//! 连接按需懒打开，租约释放后保持打开以便复用，只有 `close_connection` 会关闭并移除。

use crate::error::ProtocolError;
use crate::transport::{SerialLink, Transport};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

/// 串口参数。
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// 字节读超时
    pub timeout: Duration,
    pub write_timeout: Duration,
    pub lease_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
            lease_timeout: Duration::from_secs(30),
        }
    }
}

/// 面向操作系统的端口枚举与打开。
pub trait PortOpener: Send + Sync {
    /// 端口当前是否可用。
    fn exists(&self, port: &str) -> bool;

    fn open(&self, port: &str, settings: &SerialSettings)
    -> Result<Box<dyn SerialLink>, ProtocolError>;
}

/// 基于 tokio-serial 的真实串口。
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialOpener;

impl PortOpener for TokioSerialOpener {
    fn exists(&self, port: &str) -> bool {
        match tokio_serial::available_ports() {
            Ok(ports) if ports.iter().any(|info| info.port_name == port) => true,
            Ok(_) => Path::new(port).exists(),
            Err(err) => {
                warn!(target: "edge.protocol", port, error = %err, "serial_enumerate_failed");
                Path::new(port).exists()
            }
        }
    }

    fn open(
        &self,
        port: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn SerialLink>, ProtocolError> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(port, settings.baud_rate)
            .timeout(settings.timeout)
            .open_native_async()
            .map_err(|err| ProtocolError::Open {
                port: port.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Box::new(stream))
    }
}

struct PortEntry {
    transport: Arc<AsyncMutex<Transport>>,
    /// 持有者 + 等待者数量（诊断用）
    leases: AtomicUsize,
}

/// 端口连接池（注入式服务，进程内共享一个实例）。
pub struct PortPool {
    opener: Arc<dyn PortOpener>,
    settings: SerialSettings,
    entries: Mutex<HashMap<String, Arc<PortEntry>>>,
    /// 串行化端口打开，避免并发租约重复打开同一端口
    opening: AsyncMutex<()>,
}

impl PortPool {
    pub fn new(opener: Arc<dyn PortOpener>, settings: SerialSettings) -> Self {
        Self {
            opener,
            settings,
            entries: Mutex::new(HashMap::new()),
            opening: AsyncMutex::new(()),
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// 获取端口的独占租约。
    ///
    /// 未知端口先检查可枚举，再打开；任一失败都不会留下条目。
    /// 等待锁的时间受 `lease_timeout` 限制。
    pub async fn lease(&self, port: &str) -> Result<PortLease, ProtocolError> {
        let entry = self.entry_for(port).await?;
        entry.leases.fetch_add(1, Ordering::SeqCst);
        let lock = entry.transport.clone().lock_owned();
        match tokio::time::timeout(self.settings.lease_timeout, lock).await {
            Ok(guard) => Ok(PortLease { guard, entry }),
            Err(_) => {
                entry.leases.fetch_sub(1, Ordering::SeqCst);
                warn!(target: "edge.protocol", port, "port_lease_timeout");
                Err(ProtocolError::LeaseTimeout(port.to_string()))
            }
        }
    }

    fn cached(&self, port: &str) -> Option<Arc<PortEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(port)
            .cloned()
    }

    /// 枚举与打开都是阻塞调用，在阻塞线程池执行；条目表的锁只在查找与插入时持有。
    async fn entry_for(&self, port: &str) -> Result<Arc<PortEntry>, ProtocolError> {
        if let Some(entry) = self.cached(port) {
            return Ok(entry);
        }
        let _opening = self.opening.lock().await;
        if let Some(entry) = self.cached(port) {
            return Ok(entry);
        }

        let opener = self.opener.clone();
        let settings = self.settings.clone();
        let name = port.to_string();
        let opened = tokio::task::spawn_blocking(move || {
            if !opener.exists(&name) {
                return Err(ProtocolError::PortNotFound(name));
            }
            opener.open(&name, &settings)
        })
        .await
        .map_err(|err| ProtocolError::Open {
            port: port.to_string(),
            reason: err.to_string(),
        })?;
        let link = match opened {
            Ok(link) => link,
            Err(err @ ProtocolError::PortNotFound(_)) => {
                warn!(target: "edge.protocol", port, "serial_port_not_found");
                return Err(err);
            }
            Err(err) => {
                warn!(target: "edge.protocol", port, error = %err, "serial_port_open_failed");
                return Err(err);
            }
        };
        info!(
            target: "edge.protocol",
            port,
            baud_rate = self.settings.baud_rate,
            "serial_port_opened"
        );
        let entry = Arc::new(PortEntry {
            transport: Arc::new(AsyncMutex::new(Transport::new(
                port,
                link,
                self.settings.write_timeout,
            ))),
            leases: AtomicUsize::new(0),
        });
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(port.to_string(), entry.clone());
        Ok(entry)
    }

    /// 强制关闭并移除端口；当前持有者释放后句柄随之关闭。返回端口是否存在。
    pub fn close_connection(&self, port: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(port);
        if removed.is_some() {
            info!(target: "edge.protocol", port, "serial_port_closed");
        }
        removed.is_some()
    }

    /// 关闭全部端口（进程退出时）。
    pub fn close_all(&self) {
        let ports = self.open_ports();
        for port in ports {
            self.close_connection(&port);
        }
    }

    /// 当前已打开的端口（排序后）。
    pub fn open_ports(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut ports: Vec<String> = entries.keys().cloned().collect();
        ports.sort();
        ports
    }

    /// 端口当前的持有者 + 等待者数量。
    pub fn lease_count(&self, port: &str) -> Option<usize> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(port)
            .map(|entry| entry.leases.load(Ordering::SeqCst))
    }
}

/// 端口租约：存活期间独占该端口的传输适配器，drop 时释放。
pub struct PortLease {
    guard: OwnedMutexGuard<Transport>,
    entry: Arc<PortEntry>,
}

impl Deref for PortLease {
    type Target = Transport;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for PortLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.entry.leases.fetch_sub(1, Ordering::SeqCst);
    }
}
