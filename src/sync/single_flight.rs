//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了按缓存键的单飞锁表，保证同一进程内同一缓存键最多只有一个渲染在进行。

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

/// 单飞锁表
///
/// `pin` 在键已被占用时等待，直到持有者调用 `unpin`。
#[derive(Default)]
pub struct PinTable {
    /// 每个键对应的锁，等待者持有其克隆
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// 当前持有的锁
    held: DashMap<String, OwnedMutexGuard<()>>,
}

impl PinTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 占用缓存键，已被占用时等待释放
    #[instrument(skip(self), level = "debug")]
    pub async fn pin(&self, key: &str) {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        debug!("PinTable: pinned key={}", key);
        self.held.insert(key.to_string(), guard);
    }

    /// 释放缓存键，唤醒一个等待者
    pub fn unpin(&self, key: &str) {
        if self.held.remove(key).is_some() {
            debug!("PinTable: unpinned key={}", key);
        }
        // 只剩表本身持有时回收
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// 缓存键当前是否被占用
    pub fn is_pinned(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }

    /// 当前记录的锁数量
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
