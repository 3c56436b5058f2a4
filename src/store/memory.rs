//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于内存的片段存储实现。

use super::{CacheEntry, EntryMetadata, FragmentStore, InvalidationListener};
use crate::error::Result;
use crate::memento::FragmentMemento;
use crate::sync::single_flight::PinTable;
use crate::utils::now_millis;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use moka::future::Cache;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument};

/// 存储中的条目
struct StoredEntry {
    value: Arc<FragmentMemento>,
    metadata: EntryMetadata,
    invalid: AtomicBool,
    /// 最近访问时间（毫秒时间戳），用于不活动超时
    last_access: AtomicI64,
}

/// 标识到缓存键集合的索引
type KeyIndex = DashMap<String, HashSet<String>>;

/// 内存片段存储
///
/// 条目保存在 Moka 缓存中，次级标识和模板索引保存在 DashMap 中。
/// 过期或不活动超时的条目在读取时以失效条目返回。
pub struct MemoryStore {
    entries: Cache<String, Arc<StoredEntry>>,
    dependencies: Arc<KeyIndex>,
    templates: Arc<KeyIndex>,
    pins: PinTable,
    /// 失效时仍被占用、需要在释放时移除的键
    pending_removal: DashSet<String>,
    listeners: RwLock<Vec<Arc<dyn InvalidationListener>>>,
}

impl MemoryStore {
    /// 创建新的内存存储
    ///
    /// # 参数
    ///
    /// * `capacity` - 最大条目数
    ///
    /// # 返回值
    ///
    /// 返回新的MemoryStore实例
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            dependencies: Arc::new(DashMap::new()),
            templates: Arc::new(DashMap::new()),
            pins: PinTable::new(),
            pending_removal: DashSet::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// 缓存键是否存在（包括失效条目）
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 依赖某个次级标识的缓存键
    pub fn keys_for_id(&self, id: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .dependencies
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// 清空存储
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.dependencies.clear();
        self.templates.clear();
        self.pending_removal.clear();
        debug!("MemoryStore: cleared");
    }

    fn index(&self, key: &str, metadata: &EntryMetadata) {
        for id in &metadata.data_ids {
            self.dependencies
                .entry(id.clone())
                .or_default()
                .insert(key.to_string());
        }
        for template in &metadata.templates {
            self.templates
                .entry(template.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    async fn invalidate_keys(&self, keys: &HashSet<String>, wait: bool) -> usize {
        let mut count = 0;
        for key in keys {
            let Some(stored) = self.entries.get(key).await else {
                continue;
            };
            stored.invalid.store(true, Ordering::SeqCst);
            if wait {
                if self.pins.is_pinned(key) {
                    self.pending_removal.insert(key.clone());
                    debug!("MemoryStore: key={} pinned, removal deferred until unpin", key);
                } else {
                    self.entries.invalidate(key).await;
                    unindex(&self.dependencies, &self.templates, key, &stored.metadata);
                    debug!("MemoryStore: key={} removed", key);
                }
            } else {
                debug!("MemoryStore: key={} marked invalid", key);
            }
            count += 1;
        }
        count
    }

    async fn notify(&self, id: &str, keys: &HashSet<String>) {
        let listeners: Vec<Arc<dyn InvalidationListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return;
        }
        let mut ids = vec![id.to_string()];
        let mut rest: Vec<String> = keys.iter().filter(|k| *k != id).cloned().collect();
        rest.sort();
        ids.extend(rest);
        for listener in listeners {
            listener.on_invalidate(&ids).await;
        }
    }
}

fn unindex(dependencies: &KeyIndex, templates: &KeyIndex, key: &str, metadata: &EntryMetadata) {
    for (index, ids) in [(dependencies, &metadata.data_ids), (templates, &metadata.templates)] {
        for id in ids {
            if let Some(mut set) = index.get_mut(id) {
                set.remove(key);
            }
            index.remove_if(id, |_, set| set.is_empty());
        }
    }
}

#[async_trait]
impl FragmentStore for MemoryStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(stored) = self.entries.get(key).await else {
            debug!("MemoryStore get: key={}, found=false", key);
            return Ok(None);
        };
        let now = now_millis();
        let expired = stored.metadata.expiration.is_some_and(|at| now >= at);
        let idle = stored.metadata.inactivity.is_some_and(|secs| {
            now - stored.last_access.load(Ordering::SeqCst) >= (secs as i64) * 1000
        });
        if expired || idle {
            stored.invalid.store(true, Ordering::SeqCst);
        }
        stored.last_access.store(now, Ordering::SeqCst);
        let invalid = stored.invalid.load(Ordering::SeqCst);
        debug!("MemoryStore get: key={}, found=true, invalid={}", key, invalid);
        Ok(Some(CacheEntry {
            key: key.to_string(),
            value: stored.value.clone(),
            metadata: stored.metadata.clone(),
            invalid,
        }))
    }

    #[instrument(skip(self, value, metadata), level = "debug")]
    async fn put(
        &self,
        key: &str,
        value: Arc<FragmentMemento>,
        metadata: EntryMetadata,
    ) -> Result<()> {
        if let Some(old) = self.entries.get(key).await {
            unindex(&self.dependencies, &self.templates, key, &old.metadata);
        }
        let pending = self.pending_removal.contains(key);
        self.index(key, &metadata);
        let stored = StoredEntry {
            value,
            metadata,
            invalid: AtomicBool::new(pending),
            last_access: AtomicI64::new(now_millis()),
        };
        self.entries.insert(key.to_string(), Arc::new(stored)).await;
        debug!("MemoryStore put: key={}, invalid={}", key, pending);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn invalidate(&self, id: &str, wait: bool) -> Result<usize> {
        let mut keys = if wait {
            self.dependencies
                .remove(id)
                .map(|(_, set)| set)
                .unwrap_or_default()
        } else {
            self.dependencies
                .get(id)
                .map(|set| set.clone())
                .unwrap_or_default()
        };
        if self.entries.contains_key(id) {
            keys.insert(id.to_string());
        }
        let count = self.invalidate_keys(&keys, wait).await;
        debug!("MemoryStore invalidate: id={}, wait={}, affected={}", id, wait, count);
        self.notify(id, &keys).await;
        Ok(count)
    }

    #[instrument(skip(self), level = "debug")]
    async fn invalidate_by_template(&self, template: &str, wait: bool) -> Result<usize> {
        let keys = if wait {
            self.templates
                .remove(template)
                .map(|(_, set)| set)
                .unwrap_or_default()
        } else {
            self.templates
                .get(template)
                .map(|set| set.clone())
                .unwrap_or_default()
        };
        let count = self.invalidate_keys(&keys, wait).await;
        debug!(
            "MemoryStore invalidate_by_template: template={}, wait={}, affected={}",
            template, wait, count
        );
        self.notify(template, &keys).await;
        Ok(count)
    }

    async fn pin(&self, key: &str) {
        self.pins.pin(key).await;
    }

    fn unpin(&self, key: &str) {
        self.pins.unpin(key);
        if self.pending_removal.remove(key).is_none() {
            return;
        }
        // 条目已标记失效，移除可以异步完成
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("MemoryStore unpin: no runtime, key={} stays invalid", key);
            return;
        };
        let entries = self.entries.clone();
        let dependencies = self.dependencies.clone();
        let templates = self.templates.clone();
        let key = key.to_string();
        handle.spawn(async move {
            if let Some(old) = entries.remove(&key).await {
                unindex(&dependencies, &templates, &key, &old.metadata);
                debug!("MemoryStore unpin: deferred removal of key={}", key);
            }
        });
    }

    fn add_listener(&self, listener: Arc<dyn InvalidationListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}
