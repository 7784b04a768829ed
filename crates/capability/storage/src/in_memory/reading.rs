//! 传感器读数内存实现。
//!
//! 待同步读数按写入顺序保存；已同步读数只保留最近 `retention` 条，超出即丢弃最旧的。

use crate::error::StorageError;
use crate::traits::ReadingStore;
use domain::SensorReading;
use std::collections::VecDeque;
use std::sync::RwLock;

/// 默认保留的已同步读数条数。
pub const DEFAULT_SYNCED_RETENTION: usize = 1_000;

#[derive(Default)]
struct Readings {
    pending: Vec<SensorReading>,
    synced: VecDeque<SensorReading>,
}

impl Readings {
    fn contains(&self, reading_id: &str) -> bool {
        self.pending.iter().any(|r| r.reading_id == reading_id)
            || self.synced.iter().any(|r| r.reading_id == reading_id)
    }
}

pub struct InMemoryReadingStore {
    readings: RwLock<Readings>,
    retention: usize,
}

impl Default for InMemoryReadingStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_SYNCED_RETENTION)
    }
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            readings: RwLock::new(Readings::default()),
            retention,
        }
    }

    /// 待同步与保留中的已同步读数总数。
    pub fn len(&self) -> usize {
        self.readings
            .read()
            .map(|readings| readings.pending.len() + readings.synced.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ReadingStore for InMemoryReadingStore {
    async fn save(&self, reading: SensorReading) -> Result<SensorReading, StorageError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if readings.contains(&reading.reading_id) {
            return Err(StorageError::new(format!(
                "duplicate reading_id: {}",
                reading.reading_id
            )));
        }
        readings.pending.push(reading.clone());
        Ok(reading)
    }

    async fn mark_synced(&self, reading_id: &str) -> Result<bool, StorageError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(index) = readings
            .pending
            .iter()
            .position(|reading| reading.reading_id == reading_id)
        else {
            return Ok(readings.synced.iter().any(|r| r.reading_id == reading_id));
        };
        let mut reading = readings.pending.remove(index);
        reading.synced = true;
        readings.synced.push_back(reading);
        while readings.synced.len() > self.retention {
            readings.synced.pop_front();
        }
        Ok(true)
    }

    async fn list_pending_sync(&self, limit: usize) -> Result<Vec<SensorReading>, StorageError> {
        let readings = self
            .readings
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(readings.pending.iter().take(limit).cloned().collect())
    }
}
