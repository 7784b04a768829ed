//! 存储接口定义。

use crate::error::StorageError;
use async_trait::async_trait;
use domain::{ContainerConfig, DeviceIdentity, SensorReading};

/// 设备身份查询（设备标识 ⇄ Backend 设备 ID）。
#[async_trait]
pub trait DeviceIdentityLookup: Send + Sync {
    async fn find_by_identifier(
        &self,
        device_identifier: &str,
    ) -> Result<Option<DeviceIdentity>, StorageError>;

    async fn find_by_id(&self, device_id: &str) -> Result<Option<DeviceIdentity>, StorageError>;

    /// 以 `device_id` 为键写入；同一标识改绑新 ID 时旧记录被替换。
    async fn upsert(&self, identity: DeviceIdentity) -> Result<(), StorageError>;
}

/// 容器阈值配置存储。
#[async_trait]
pub trait ContainerConfigStore: Send + Sync {
    async fn upsert(&self, config: ContainerConfig) -> Result<(), StorageError>;

    async fn find_by_id(&self, container_id: &str)
    -> Result<Option<ContainerConfig>, StorageError>;

    async fn find_by_sensor_id(
        &self,
        sensor_id: &str,
    ) -> Result<Option<ContainerConfig>, StorageError>;
}

/// 传感器读数存储。
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn save(&self, reading: SensorReading) -> Result<SensorReading, StorageError>;

    /// 返回读数是否存在。
    async fn mark_synced(&self, reading_id: &str) -> Result<bool, StorageError>;

    /// 未同步读数（按写入顺序，最多 `limit` 条）。
    async fn list_pending_sync(&self, limit: usize) -> Result<Vec<SensorReading>, StorageError>;
}
