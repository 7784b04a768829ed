//! 设备身份内存实现。

use crate::error::StorageError;
use crate::traits::DeviceIdentityLookup;
use domain::DeviceIdentity;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryIdentityStore {
    // key: device_id
    identities: RwLock<HashMap<String, DeviceIdentity>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identities.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl DeviceIdentityLookup for InMemoryIdentityStore {
    async fn find_by_identifier(
        &self,
        device_identifier: &str,
    ) -> Result<Option<DeviceIdentity>, StorageError> {
        let map = self
            .identities
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(map
            .values()
            .find(|identity| identity.device_identifier == device_identifier)
            .cloned())
    }

    async fn find_by_id(&self, device_id: &str) -> Result<Option<DeviceIdentity>, StorageError> {
        let map = self
            .identities
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(map.get(device_id).cloned())
    }

    async fn upsert(&self, identity: DeviceIdentity) -> Result<(), StorageError> {
        if identity.device_id.is_empty() || identity.device_identifier.is_empty() {
            return Err(StorageError::new("device_id and device_identifier required"));
        }
        let mut map = self
            .identities
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        map.retain(|id, existing| {
            id == &identity.device_id || existing.device_identifier != identity.device_identifier
        });
        map.insert(identity.device_id.clone(), identity);
        Ok(())
    }
}
