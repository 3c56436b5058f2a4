//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了接收边缘节点连接的监听器。

use super::group::ExternalCacheGroup;
use super::protocol::{read_message, Message};
use crate::error::{FragmentError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 边缘节点连接监听器
///
/// 每个接入的连接写半部交给组的适配器，读半部运行读循环；
/// 边缘节点只允许发送 REMOVE，其他消息视为帧错误并断开连接。
pub struct ExternalCacheListener {
    listener: TcpListener,
    group: Arc<ExternalCacheGroup>,
}

impl ExternalCacheListener {
    pub async fn bind(addr: &str, group: Arc<ExternalCacheGroup>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, group })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 在后台运行接收循环
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let (reader, writer) = stream.into_split();
                    let peer = peer.to_string();
                    let id = self.group.adapter().connect(&peer, writer);
                    let group = self.group.clone();
                    tokio::spawn(async move {
                        serve_connection(group, id, &peer, reader).await;
                    });
                }
                Err(e) => {
                    warn!(
                        "ExternalCacheListener[{}]: accept failed: {}",
                        self.group.name(),
                        e
                    );
                }
            }
        }
    }
}

/// 连接读循环
///
/// 连接关闭或出错后从适配器移除连接。
pub async fn serve_connection<R: AsyncRead + Unpin>(
    group: Arc<ExternalCacheGroup>,
    id: u64,
    peer: &str,
    mut reader: R,
) {
    let outcome = read_loop(&group, &mut reader).await;
    match outcome {
        Ok(()) => debug!("ExternalCacheListener: {} closed the connection", peer),
        Err(e) => warn!("ExternalCacheListener: dropping {}: {}", peer, e),
    }
    if group.adapter().remove_connection(id).await {
        info!("ExternalCacheListener: connection {} from {} finished", id, peer);
    }
}

async fn read_loop<R: AsyncRead + Unpin>(group: &ExternalCacheGroup, reader: &mut R) -> Result<()> {
    while let Some(message) = read_message(reader).await? {
        match message {
            Message::Remove { vhost, uri } => group.forget(&vhost, &uri),
            Message::Add(entry) => {
                return Err(FragmentError::ProtocolFraming(format!(
                    "unexpected ADD of {} from edge",
                    entry.uri
                )))
            }
        }
    }
    Ok(())
}
