//! # 轮询能力模块
//!
//! 后台循环逐台轮询设备，把读数交给处理管道，并维护设备上下线状态。
//!
//! ```text
//! PollingOrchestrator ── 每轮：投递排队命令 → 逐台 DevicePoller::poll_device
//!        │
//!        ▼
//! DevicePoller ── PortPool 租约 → ping → 读数 → ReadingProcessor
//!        │
//!        ▼
//! DeviceStatusTracker ── 边沿事件 → StatusPublisher (cm/devices/events/*)
//! ```

mod error;
mod orchestrator;
mod poller;
mod tracker;

pub use error::PollingError;
pub use orchestrator::{OrchestratorSettings, PollingOrchestrator};
pub use poller::DevicePoller;
pub use tracker::{BusStatusPublisher, DeviceStatusTracker, StatusPublisher};
