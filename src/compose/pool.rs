//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段组合节点的对象池。

use super::composer::FragmentComposer;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// 组合节点池
///
/// 回收的节点（连同其子节点）会被清空后复用，池满时直接丢弃。
#[derive(Debug)]
pub struct ComposerPool {
    free: Mutex<Vec<Box<FragmentComposer>>>,
    capacity: usize,
}

impl ComposerPool {
    /// # 参数
    ///
    /// * `capacity` - 池中最多保留的空闲节点数
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// 取出一个空节点
    pub fn acquire(&self) -> Box<FragmentComposer> {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    /// 回收节点及其子节点
    pub fn release(&self, composer: Box<FragmentComposer>) {
        let mut pending = vec![composer];
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(mut node) = pending.pop() {
            pending.extend(node.take_children());
            if free.len() < self.capacity {
                node.reset();
                free.push(node);
            }
        }
        debug!("ComposerPool: {} idle composers", free.len());
    }

    /// 当前空闲节点数
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
