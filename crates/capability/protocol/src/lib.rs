//! # 串口通信能力模块
//!
//! 传感器通过蓝牙 SPP 虚拟串口连接，报文为按行分隔的 JSON。
//!
//! ## 架构设计
//!
//! ```text
//! PollingOrchestrator
//!       │
//!       ▼
//! PortPool::lease(port) ── PortOpener (tokio-serial / 测试用 duplex)
//!       │
//!       ▼
//! PortLease ⇒ &mut Transport
//!       │
//!       ▼
//! CommandClient (ping / request_current_reading / set_threshold ...)
//! ```
//!
//! ## 报文格式
//!
//! ```json
//! {"topic": "command/ping", "data": {}}
//! {"topic": "config/threshold", "data": {"value": 80.0}}
//! {"topic": "response/current_reading", "data": {"pct": 78.5, "ale": true}}
//! ```

mod client;
mod envelope;
mod error;
mod pool;
mod transport;

pub use client::CommandClient;
pub use envelope::{Envelope, Topic};
pub use error::ProtocolError;
pub use pool::{PortLease, PortOpener, PortPool, SerialSettings, TokioSerialOpener};
pub use transport::{SerialLink, Transport};
