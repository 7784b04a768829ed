//! 内存存储实现模块
//!
//! 包含以下实现：
//! - DeviceIdentityLookup: InMemoryIdentityStore
//! - ContainerConfigStore: InMemoryContainerConfigStore
//! - ReadingStore: InMemoryReadingStore

pub mod container;
pub mod identity;
pub mod reading;

pub use container::*;
pub use identity::*;
pub use reading::*;
