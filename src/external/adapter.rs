//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了外部缓存适配器，负责把片段推送到所有在线的边缘节点连接。

use super::connection::ExternalConnection;
use super::protocol::{encode, ExternalEntry, Message};
use crate::metrics::GLOBAL_METRICS;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWrite;
use tracing::{debug, info, instrument, warn};

#[derive(Default)]
struct AdapterState {
    /// 在线连接，每次变更都替换为新的数组
    connections: Arc<Vec<Arc<ExternalConnection>>>,
    /// uri -> 已推送的虚拟主机
    uri_hosts: HashMap<String, BTreeSet<String>>,
}

/// 外部缓存适配器
///
/// 连接集合和 uri 映射由同一把锁保护；发送前先取连接数组的快照，
/// 迭代过程中其他任务移除连接不会影响本次迭代。
pub struct ExternalCacheAdapter {
    name: String,
    state: Mutex<AdapterState>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ExternalCacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalCacheAdapter")
            .field("name", &self.name)
            .field("connections", &self.len())
            .finish()
    }
}

impl ExternalCacheAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(AdapterState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 接入一个新的边缘节点连接
    ///
    /// # 返回值
    ///
    /// 返回连接编号
    pub fn connect(&self, peer: &str, writer: impl AsyncWrite + Send + Unpin + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.add_connection(Arc::new(ExternalConnection::new(id, peer, writer)));
        id
    }

    pub fn add_connection(&self, connection: Arc<ExternalConnection>) {
        let count = {
            let mut state = self.state();
            let mut next = state.connections.as_ref().clone();
            next.push(connection.clone());
            state.connections = Arc::new(next);
            state.connections.len()
        };
        GLOBAL_METRICS.set_external_connections(&self.name, count);
        info!(
            "ExternalCacheAdapter[{}]: connection {} from {} added, live={}",
            self.name,
            connection.id(),
            connection.peer(),
            count
        );
    }

    /// 移除并关闭连接
    ///
    /// # 返回值
    ///
    /// 连接仍在集合中时返回 true
    pub async fn remove_connection(&self, id: u64) -> bool {
        let (removed, count) = {
            let mut state = self.state();
            let removed = state.connections.iter().find(|c| c.id() == id).cloned();
            if removed.is_some() {
                let next = state
                    .connections
                    .iter()
                    .filter(|c| c.id() != id)
                    .cloned()
                    .collect();
                state.connections = Arc::new(next);
            }
            (removed, state.connections.len())
        };
        match removed {
            Some(connection) => {
                connection.close().await;
                GLOBAL_METRICS.set_external_connections(&self.name, count);
                info!(
                    "ExternalCacheAdapter[{}]: connection {} to {} removed, live={}",
                    self.name,
                    id,
                    connection.peer(),
                    count
                );
                true
            }
            None => false,
        }
    }

    /// 当前连接数组的快照
    pub fn snapshot(&self) -> Arc<Vec<Arc<ExternalConnection>>> {
        self.state().connections.clone()
    }

    pub fn len(&self) -> usize {
        self.state().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 某个 uri 已推送到的虚拟主机
    pub fn hosts_for(&self, uri: &str) -> Vec<String> {
        self.state()
            .uri_hosts
            .get(uri)
            .map(|hosts| hosts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 边缘节点自行移除了片段
    ///
    /// # 返回值
    ///
    /// uri 已不在任何虚拟主机上时返回 true
    pub fn forget(&self, vhost: &str, uri: &str) -> bool {
        let mut state = self.state();
        let gone = match state.uri_hosts.get_mut(uri) {
            Some(hosts) => {
                hosts.remove(vhost);
                hosts.is_empty()
            }
            None => true,
        };
        if gone {
            state.uri_hosts.remove(uri);
        }
        debug!("ExternalCacheAdapter[{}]: forgot {}{}", self.name, vhost, uri);
        gone
    }

    /// 推送片段到所有在线连接
    ///
    /// 单个连接写入失败只会移除该连接，其余连接照常投递。
    ///
    /// # 返回值
    ///
    /// 返回成功投递的消息数
    #[instrument(skip(self, entries), level = "debug", fields(adapter = %self.name))]
    pub async fn publish(&self, entries: &[ExternalEntry]) -> usize {
        let mut delivered = 0;
        for entry in entries {
            let frame = match encode(&Message::Add(entry.clone())) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        "ExternalCacheAdapter[{}]: cannot encode {}: {}",
                        self.name, entry.uri, e
                    );
                    GLOBAL_METRICS.record_external(&self.name, "publish", "encode_error");
                    continue;
                }
            };
            self.state()
                .uri_hosts
                .entry(entry.uri.clone())
                .or_default()
                .insert(entry.vhost.clone());
            delivered += self.broadcast(&frame, "publish").await;
        }
        delivered
    }

    /// 通知所有连接移除 uri
    ///
    /// # 返回值
    ///
    /// 返回成功投递的消息数
    #[instrument(skip(self, uris), level = "debug", fields(adapter = %self.name))]
    pub async fn invalidate(&self, uris: &[String]) -> usize {
        let mut delivered = 0;
        for uri in uris {
            let hosts = self.state().uri_hosts.remove(uri);
            let Some(hosts) = hosts else {
                debug!("ExternalCacheAdapter[{}]: {} was never published", self.name, uri);
                continue;
            };
            for vhost in hosts {
                let message = Message::Remove {
                    vhost,
                    uri: uri.clone(),
                };
                match encode(&message) {
                    Ok(frame) => delivered += self.broadcast(&frame, "remove").await,
                    Err(e) => warn!(
                        "ExternalCacheAdapter[{}]: cannot encode remove of {}: {}",
                        self.name, uri, e
                    ),
                }
            }
        }
        delivered
    }

    /// 逐个移除所有连接
    pub async fn clear(&self) {
        loop {
            let next = self.state().connections.first().map(|c| c.id());
            match next {
                Some(id) => {
                    self.remove_connection(id).await;
                }
                None => break,
            }
        }
        self.state().uri_hosts.clear();
    }

    async fn broadcast(&self, frame: &[u8], op: &str) -> usize {
        let connections = self.snapshot();
        let mut delivered = 0;
        for connection in connections.iter() {
            match connection.send(frame).await {
                Ok(()) => {
                    delivered += 1;
                    GLOBAL_METRICS.record_external(&self.name, op, "ok");
                }
                Err(e) => {
                    warn!("ExternalCacheAdapter[{}]: {}, dropping connection", self.name, e);
                    GLOBAL_METRICS.record_external(&self.name, op, "failed");
                    self.remove_connection(connection.id()).await;
                }
            }
        }
        delivered
    }
}
