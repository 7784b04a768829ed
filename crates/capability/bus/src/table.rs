//! 订阅表：有序的 过滤器 → 处理器 列表。

use crate::error::BusError;
use crate::filter::TopicFilter;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// 入站消息处理器。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: Value) -> Result<(), BusError>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&str, Value) -> Result<(), BusError> + Send + Sync,
{
    async fn handle(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        self(topic, payload)
    }
}

/// 订阅表（内部加锁，可从任意任务并发读写）。
#[derive(Default)]
pub struct SubscriptionTable {
    entries: RwLock<Vec<(TopicFilter, Arc<dyn MessageHandler>)>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册；同一过滤器再次注册时原位替换处理器。
    pub fn insert(&self, filter: TopicFilter, handler: Arc<dyn MessageHandler>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|(existing, _)| *existing == filter) {
            Some(entry) => entry.1 = handler,
            None => entries.push((filter, handler)),
        }
    }

    /// 先精确匹配，再按注册顺序取第一个通配匹配。
    pub fn lookup(&self, topic: &str) -> Option<Arc<dyn MessageHandler>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|(filter, _)| !filter.is_wildcard() && filter.as_str() == topic)
            .or_else(|| {
                entries
                    .iter()
                    .find(|(filter, _)| filter.is_wildcard() && filter.matches(topic))
            })
            .map(|(_, handler)| handler.clone())
    }

    /// 已注册的过滤器（注册顺序）。
    pub fn patterns(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(filter, _)| filter.as_str().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
