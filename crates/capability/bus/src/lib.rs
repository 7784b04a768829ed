//! # 消息总线能力模块
//!
//! 与云端 Backend 之间的 MQTT 发布 / 订阅：
//! - 订阅表支持 `+` / `#` 通配，精确匹配优先，其次按注册顺序取第一个通配匹配
//! - 每次连接成功（含首次）自动重新订阅全部过滤器
//! - 断开期间 `publish` 立即返回 false，不排队
//! - 连接错误后固定延迟重连，同一时刻最多一个待定重连

mod client;
mod error;
mod filter;
mod table;

pub use client::{BusClient, BusLink, BusOptions, Publisher};
pub use error::BusError;
pub use filter::TopicFilter;
pub use table::{MessageHandler, SubscriptionTable};

/// Backend → Edge：设备创建
pub const TOPIC_DEVICE_CREATED: &str = "cm/devices/events/created";
/// Backend → Edge：设备更新
pub const TOPIC_DEVICE_UPDATED: &str = "cm/devices/events/updated";
/// Backend → Edge：容器阈值配置更新
pub const TOPIC_CONTAINER_CONFIG_UPDATED: &str = "cm/containers/events/config/updated";
/// Edge → Backend：满溢告警
pub const TOPIC_SENSOR_ALERT_FULL: &str = "cm/sensors/alerts/full";
/// Edge → Backend：读数批次
pub const TOPIC_SENSOR_READINGS_BATCH: &str = "cm/sensors/readings/batch";
