//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了到单个边缘节点的连接句柄。

use crate::error::{FragmentError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// 边缘节点连接
///
/// 同一连接上的写入串行化，不同连接可以并发写入。
pub struct ExternalConnection {
    id: u64,
    peer: String,
    writer: Mutex<Writer>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ExternalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ExternalConnection {
    pub fn new(id: u64, peer: &str, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            id,
            peer: peer.to_string(),
            writer: Mutex::new(Box::new(writer)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 写出一帧并刷新
    ///
    /// 已关闭的连接按普通写入失败处理。
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(FragmentError::ExternalConnection(format!(
                "connection {} to {} is closed",
                self.id, self.peer
            )));
        }
        let mut writer = self.writer.lock().await;
        let result = match writer.write_all(frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            FragmentError::ExternalConnection(format!(
                "write to {} (connection {}) failed: {}",
                self.peer, self.id, e
            ))
        })
    }

    /// 关闭连接
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("ExternalConnection: shutdown of {} failed: {}", self.peer, e);
        }
    }
}
