//! # Edge Storage 模块
//!
//! 网关本地缓存的存储抽象：
//!
//! 1. **接口抽象层** (`traits.rs`)：设备身份、容器配置、传感器读数的异步 Trait
//! 2. **错误处理层** (`error.rs`)：统一的存储错误类型
//! 3. **实现层** (`in_memory/`)：`RwLock<HashMap>` 内存实现；读数保留待同步队列与有限条已同步记录
//!
//! 设备身份与容器配置由 Backend 通过总线事件下发，读数由轮询产生，
//! 发布成功后标记为已同步。

pub mod error;
pub mod in_memory;
pub mod traits;

pub use error::*;
pub use traits::*;

pub use in_memory::{InMemoryContainerConfigStore, InMemoryIdentityStore, InMemoryReadingStore};
