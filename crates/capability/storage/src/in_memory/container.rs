//! 容器配置内存实现。

use crate::error::StorageError;
use crate::traits::ContainerConfigStore;
use domain::ContainerConfig;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryContainerConfigStore {
    // key: container_id
    configs: RwLock<HashMap<String, ContainerConfig>>,
}

impl InMemoryContainerConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ContainerConfigStore for InMemoryContainerConfigStore {
    async fn upsert(&self, config: ContainerConfig) -> Result<(), StorageError> {
        let mut map = self
            .configs
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        map.insert(config.container_id.clone(), config);
        Ok(())
    }

    async fn find_by_id(
        &self,
        container_id: &str,
    ) -> Result<Option<ContainerConfig>, StorageError> {
        let map = self
            .configs
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(map.get(container_id).cloned())
    }

    async fn find_by_sensor_id(
        &self,
        sensor_id: &str,
    ) -> Result<Option<ContainerConfig>, StorageError> {
        let map = self
            .configs
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        // 同一传感器绑定多个容器时取最近更新的一条
        Ok(map
            .values()
            .filter(|config| config.sensor_id == sensor_id)
            .max_by_key(|config| config.updated_at)
            .cloned())
    }
}
