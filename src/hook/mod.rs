//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段缓存引擎与协作渲染器之间的挂钩。
//!
//! 协作方实现 [`Renderer`]，引擎在每次渲染（顶层请求、每个 include/forward）时调用它，
//! 当前组合节点通过 [`RenderContext`] 显式传递，不依赖任何线程局部状态。

pub mod context;
pub mod engine;
pub mod scope;

use crate::compose::{CacheType, ValueSet};
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

pub use context::RenderContext;
pub use engine::FragmentCacheEngine;
pub use scope::{IncludedRequest, RequestScope};

/// 协作渲染器
#[async_trait]
pub trait Renderer: Send + Sync {
    /// 渲染当前节点
    ///
    /// 输出、副作用和子片段分派都通过 `ctx` 完成。
    async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<RenderStatus>;
}

/// 渲染结果
pub enum RenderStatus {
    Complete,
    /// 渲染完成，但结果不能缓存（例如输出了错误页）
    Uncacheable,
    /// 渲染挂起，等待异步完成
    Suspended(AsyncContinuation),
}

impl std::fmt::Debug for RenderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderStatus::Complete => write!(f, "Complete"),
            RenderStatus::Uncacheable => write!(f, "Uncacheable"),
            RenderStatus::Suspended(_) => write!(f, "Suspended"),
        }
    }
}

/// 异步续体
///
/// `signal` 触发后引擎调用 `resume` 在同一节点上继续渲染；
/// 发送端被丢弃视为渲染失败，超过配置期限视为超时。
pub struct AsyncContinuation {
    pub signal: oneshot::Receiver<()>,
    pub resume: Box<dyn AsyncResume>,
}

impl AsyncContinuation {
    pub fn new(signal: oneshot::Receiver<()>, resume: impl AsyncResume + 'static) -> Self {
        Self {
            signal,
            resume: Box::new(resume),
        }
    }
}

/// 异步完成回调
#[async_trait]
pub trait AsyncResume: Send {
    async fn resume(self: Box<Self>, ctx: &mut RenderContext<'_>) -> Result<RenderStatus>;
}

/// 单次请求的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentReport {
    pub template: String,
    pub key: Option<String>,
    pub cache_type: CacheType,
    pub data_ids: Vec<String>,
    /// 顶层节点及所有后代的失效标识
    pub invalidation_set: ValueSet,
    pub has_esi_include: bool,
}
