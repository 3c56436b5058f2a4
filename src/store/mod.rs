//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段缓存引擎所依赖的抽象键值存储接口。
//!
//! 引擎只通过 [`FragmentStore`] 读写片段快照：按键读取、写入、按键或次级标识失效、
//! 按模板失效，以及在未命中渲染期间占用缓存键。

pub mod memory;

use crate::config::SharingPolicy;
use crate::error::Result;
use crate::memento::FragmentMemento;
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryStore;

/// 条目元数据
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryMetadata {
    /// 过期时间（毫秒时间戳），None 表示永不过期
    pub expiration: Option<i64>,
    /// 创建时间（毫秒时间戳）
    pub timestamp: i64,
    pub priority: u8,
    pub sharing: SharingPolicy,
    /// 不活动超时（秒）
    pub inactivity: Option<u64>,
    /// 次级失效标识
    pub data_ids: Vec<String>,
    pub templates: Vec<String>,
}

/// 存储条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Arc<FragmentMemento>,
    pub metadata: EntryMetadata,
    pub(crate) invalid: bool,
}

impl CacheEntry {
    pub fn new(key: &str, value: Arc<FragmentMemento>, metadata: EntryMetadata) -> Self {
        Self {
            key: key.to_string(),
            value,
            metadata,
            invalid: false,
        }
    }

    /// 条目存在但已失效（过期或被标记失效）
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn expiration_time(&self) -> Option<i64> {
        self.metadata.expiration
    }

    pub fn timestamp(&self) -> i64 {
        self.metadata.timestamp
    }

    pub fn data_ids(&self) -> &[String] {
        &self.metadata.data_ids
    }

    pub fn templates(&self) -> &[String] {
        &self.metadata.templates
    }
}

/// 失效监听器
///
/// 存储每次失效都会通知监听器，外部缓存据此向边缘节点发送移除通知。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvalidationListener: Send + Sync {
    /// # 参数
    ///
    /// * `ids` - 被失效的标识（缓存键、次级标识或模板）
    async fn on_invalidate(&self, ids: &[String]);
}

/// 抽象片段存储
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// 读取条目，失效条目也会返回，由调用方通过 `is_invalid` 区分
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn put(&self, key: &str, value: Arc<FragmentMemento>, metadata: EntryMetadata)
        -> Result<()>;

    /// 按缓存键或次级标识失效
    ///
    /// # 参数
    ///
    /// * `id` - 缓存键或次级标识
    /// * `wait` - 为 true 时立即移除条目；为 false 时只标记失效
    ///
    /// # 返回值
    ///
    /// 返回受影响的条目数
    async fn invalidate(&self, id: &str, wait: bool) -> Result<usize>;

    /// 按模板失效
    async fn invalidate_by_template(&self, template: &str, wait: bool) -> Result<usize>;

    /// 占用缓存键，已被其他渲染占用时等待其释放
    async fn pin(&self, key: &str);

    /// 释放缓存键
    fn unpin(&self, key: &str);

    fn add_listener(&self, listener: Arc<dyn InvalidationListener>);
}

/// 缓存键占用守卫
///
/// 离开作用域时释放缓存键，渲染出错或提前返回时同样生效。
pub struct PinGuard {
    store: Arc<dyn FragmentStore>,
    key: String,
}

impl PinGuard {
    pub async fn acquire(store: &Arc<dyn FragmentStore>, key: &str) -> Self {
        store.pin(key).await;
        Self {
            store: store.clone(),
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.store.unpin(&self.key);
    }
}
