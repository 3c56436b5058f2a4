//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段缓存引擎的错误类型和处理机制。

use thiserror::Error;

/// 片段缓存错误类型枚举
///
/// 除渲染失败、异步超时和回放失败外，其余错误都只影响单个缓存键或单个外部连接，
/// 由引擎内部隔离并记录日志。
#[derive(Error, Debug)]
pub enum FragmentError {
    /// 缓存键解析失败（必需组件缺失或求值出错）
    #[error("Key resolution failed: {0}")]
    KeyResolution(String),

    /// 序列化错误（属性快照无法跨进程共享）
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 协作渲染器抛出的错误
    #[error("Render failed: {0}")]
    Render(String),

    /// 回放存储的片段失败
    #[error("Replay failed: {0}")]
    Replay(String),

    /// 同一输出流混用字节与字符
    #[error("Output mode conflict: {0}")]
    OutputMode(String),

    /// 异步渲染未在期限内完成
    #[error("Async render timed out: {0}")]
    AsyncTimeout(String),

    /// 外部缓存连接写入失败
    #[error("External connection failed: {0}")]
    ExternalConnection(String),

    /// 外部缓存协议帧错误
    #[error("Protocol framing error: {0}")]
    ProtocolFraming(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 存储后端错误
    #[error("Store error: {0}")]
    Store(String),

    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON错误
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 片段缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, FragmentError>;
