//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了边缘回源地址到片段策略的注册表。

use crate::config::FragmentPolicy;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// 边缘地址注册表
///
/// 片段被委托给边缘节点时登记其回源地址，边缘节点回源时据此找回策略。
/// 由引擎在加载策略时创建，策略重新加载时清空。
#[derive(Debug, Default)]
pub struct EsiRegistry {
    urls: DashMap<String, Arc<FragmentPolicy>>,
}

impl EsiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: &str, policy: Arc<FragmentPolicy>) {
        if self.urls.insert(url.to_string(), policy).is_none() {
            debug!("EsiRegistry: registered {}", url);
        }
    }

    pub fn lookup(&self, url: &str) -> Option<Arc<FragmentPolicy>> {
        self.urls.get(url).map(|p| p.value().clone())
    }

    pub fn clear(&self) {
        self.urls.clear();
        debug!("EsiRegistry: cleared");
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
