//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了外部缓存组，维护失效标识到已推送 uri 的索引。

use super::adapter::ExternalCacheAdapter;
use super::listener::ExternalCacheListener;
use super::protocol::ExternalEntry;
use crate::compose::ValueSet;
use crate::config::ExternalConfig;
use crate::error::{FragmentError, Result};
use crate::store::InvalidationListener;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 外部缓存组
///
/// 推送片段时，片段失效标识集合中的每个标识都指向该片段的 uri；
/// 失效任意一个标识都会通知边缘节点移除该片段。
#[derive(Debug)]
pub struct ExternalCacheGroup {
    name: String,
    adapter: Arc<ExternalCacheAdapter>,
    /// 失效标识 -> uri
    index: DashMap<String, BTreeSet<String>>,
    /// uri -> 失效标识
    uri_ids: DashMap<String, BTreeSet<String>>,
}

impl ExternalCacheGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            adapter: Arc::new(ExternalCacheAdapter::new(name)),
            index: DashMap::new(),
            uri_ids: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> &Arc<ExternalCacheAdapter> {
        &self.adapter
    }

    /// 推送片段并登记它的失效标识
    ///
    /// # 参数
    ///
    /// * `entry` - 片段
    /// * `ids` - 片段的失效标识集合
    pub async fn publish(&self, entry: ExternalEntry, ids: &ValueSet) -> usize {
        // 重新推送时以新的标识集合为准
        self.unindex(&entry.uri);
        for id in ids {
            self.index
                .entry(id.clone())
                .or_default()
                .insert(entry.uri.clone());
        }
        self.uri_ids
            .insert(entry.uri.clone(), ids.iter().cloned().collect());
        debug!(
            "ExternalCacheGroup[{}]: publishing {} with {} ids",
            self.name,
            entry.uri,
            ids.len()
        );
        self.adapter.publish(std::slice::from_ref(&entry)).await
    }

    /// 按失效标识移除边缘节点上的片段
    ///
    /// # 返回值
    ///
    /// 返回发出的移除消息数
    pub async fn invalidate_ids(&self, ids: &[String]) -> usize {
        let uris: BTreeSet<String> = ids
            .iter()
            .filter_map(|id| self.index.remove(id))
            .flat_map(|(_, uris)| uris)
            .collect();
        if uris.is_empty() {
            return 0;
        }
        let uris: Vec<String> = uris.into_iter().collect();
        for uri in &uris {
            self.unindex(uri);
        }
        debug!("ExternalCacheGroup[{}]: removing {:?}", self.name, uris);
        self.adapter.invalidate(&uris).await
    }

    /// 边缘节点自行移除了片段
    ///
    /// uri 不再存在于任何虚拟主机时一并移出失效索引。
    pub fn forget(&self, vhost: &str, uri: &str) {
        if self.adapter.forget(vhost, uri) {
            self.unindex(uri);
        }
    }

    /// 从失效索引中移除 uri
    fn unindex(&self, uri: &str) {
        let Some((_, ids)) = self.uri_ids.remove(uri) else {
            return;
        };
        for id in ids {
            if let Some(mut uris) = self.index.get_mut(&id) {
                uris.remove(uri);
            }
            self.index.remove_if(&id, |_, uris| uris.is_empty());
        }
    }

    /// 失效索引中的标识数
    pub fn indexed_ids(&self) -> usize {
        self.index.len()
    }

    /// 某个标识当前指向的 uri
    pub fn uris_for(&self, id: &str) -> Vec<String> {
        self.index
            .get(id)
            .map(|uris| uris.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// 外部缓存组注册表
///
/// 作为存储的失效监听器，把存储层的失效转发给所有组。
#[derive(Debug, Default)]
pub struct ExternalCacheRegistry {
    groups: HashMap<String, Arc<ExternalCacheGroup>>,
    listen: Vec<(String, String)>,
}

impl ExternalCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置创建所有组
    pub fn from_config(config: &ExternalConfig) -> Self {
        let mut registry = Self::new();
        for group in &config.groups {
            registry.add_group(Arc::new(ExternalCacheGroup::new(&group.name)));
            if let Some(addr) = &group.listen {
                registry.listen.push((group.name.clone(), addr.clone()));
            }
        }
        registry
    }

    pub fn add_group(&mut self, group: Arc<ExternalCacheGroup>) {
        self.groups.insert(group.name().to_string(), group);
    }

    pub fn group(&self, name: &str) -> Option<Arc<ExternalCacheGroup>> {
        self.groups.get(name).cloned()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Arc<ExternalCacheGroup>> {
        self.groups.values()
    }

    /// 为配置了监听地址的组启动监听
    pub async fn start_listeners(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.listen.len());
        for (name, addr) in &self.listen {
            let group = self
                .group(name)
                .ok_or_else(|| FragmentError::Config(format!("unknown external group {}", name)))?;
            let listener = ExternalCacheListener::bind(addr, group.clone()).await?;
            info!(
                "ExternalCacheRegistry: group {} listening on {}",
                name,
                listener.local_addr()?
            );
            handles.push(listener.spawn());
        }
        Ok(handles)
    }

    /// 断开所有组的连接
    pub async fn shutdown(&self) {
        for group in self.groups.values() {
            group.adapter().clear().await;
        }
    }
}

#[async_trait]
impl InvalidationListener for ExternalCacheRegistry {
    async fn on_invalidate(&self, ids: &[String]) {
        for group in self.groups.values() {
            group.invalidate_ids(ids).await;
        }
    }
}
