//! HTTP 处理器与 Backend 总线事件处理器。

pub mod backend;
pub mod system;
