//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了异步挂起渲染的集成测试。

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{build_engine, config_with, serve, setup_logging};
use oxfrag::{
    AsyncContinuation, AsyncResume, CacheType, DispatchTarget, FragmentError, FragmentPolicy,
    FragmentRequest, RenderContext, RenderStatus, Renderer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// 异步完成方式
#[derive(Clone, Copy)]
enum Completion {
    /// 指定毫秒后触发
    After(u64),
    /// 丢弃发送端
    Abandon,
}

/// 先输出前半部分并挂起，完成后输出后半部分
struct AsyncRenderer {
    completion: Completion,
    /// 续体中再次包含自身
    redispatch: bool,
    renders: AtomicUsize,
}

impl AsyncRenderer {
    fn new(completion: Completion) -> Self {
        Self {
            completion,
            redispatch: false,
            renders: AtomicUsize::new(0),
        }
    }
}

struct Finish {
    redispatch: bool,
}

#[async_trait]
impl AsyncResume for Finish {
    async fn resume(self: Box<Self>, ctx: &mut RenderContext<'_>) -> oxfrag::Result<RenderStatus> {
        if self.redispatch {
            ctx.write_str("[")?;
            let own = DispatchTarget::include(&ctx.target().path);
            ctx.include(own).await?;
            ctx.write_str("]")?;
        }
        ctx.write_str("done")?;
        Ok(RenderStatus::Complete)
    }
}

#[async_trait]
impl Renderer for AsyncRenderer {
    async fn render(&self, ctx: &mut RenderContext<'_>) -> oxfrag::Result<RenderStatus> {
        if ctx.is_redispatched() {
            ctx.write_str("again")?;
            return Ok(RenderStatus::Complete);
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        ctx.write_str("start-")?;

        let (tx, rx) = oneshot::channel();
        match self.completion {
            Completion::After(ms) => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let _ = tx.send(());
                });
            }
            Completion::Abandon => drop(tx),
        }
        Ok(RenderStatus::Suspended(AsyncContinuation::new(
            rx,
            Finish {
                redispatch: self.redispatch,
            },
        )))
    }
}

fn async_config(timeout_ms: u64) -> oxfrag::Config {
    let mut config = config_with(vec![FragmentPolicy::new("async", "/async")]);
    config.global.async_timeout_ms = timeout_ms;
    config
}

/// 测试挂起后恢复的渲染结果完整写入存储
#[tokio::test]
async fn test_suspended_render_resumes_and_caches() {
    setup_logging();
    let renderer = Arc::new(AsyncRenderer::new(Completion::After(20)));
    let (engine, _store) = build_engine(async_config(1_000), renderer.clone());
    let request = FragmentRequest::get("/async");

    let (first, report) = serve(&engine, &request).await;
    assert_eq!(first.body_string(), "start-done");
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);

    let (second, report) = serve(&engine, &request).await;
    assert_eq!(second.body_string(), "start-done");
    assert_eq!(report.unwrap().cache_type, CacheType::WasCached);
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
}

/// 测试异步完成超过期限时返回超时错误且不缓存
#[tokio::test]
async fn test_async_timeout() {
    setup_logging();
    let renderer = Arc::new(AsyncRenderer::new(Completion::After(500)));
    let (engine, store) = build_engine(async_config(50), renderer.clone());

    let (_, report) = serve(&engine, &FragmentRequest::get("/async")).await;
    assert!(matches!(report, Err(FragmentError::AsyncTimeout(_))));
    assert!(!store.contains("async:requestType=GET"));
}

/// 测试异步完成方被丢弃时视为渲染失败
#[tokio::test]
async fn test_abandoned_completion_fails_render() {
    setup_logging();
    let renderer = Arc::new(AsyncRenderer::new(Completion::Abandon));
    let (engine, store) = build_engine(async_config(1_000), renderer.clone());

    let (_, report) = serve(&engine, &FragmentRequest::get("/async")).await;
    assert!(matches!(report, Err(FragmentError::Render(_))));
    assert!(!store.contains("async:requestType=GET"));
}

/// 测试挂起期间再次分派到自身时就地渲染，不产生死锁
#[tokio::test]
async fn test_redispatch_during_suspension_renders_in_place() {
    setup_logging();
    let mut renderer = AsyncRenderer::new(Completion::After(10));
    renderer.redispatch = true;
    let renderer = Arc::new(renderer);
    let (engine, _store) = build_engine(async_config(1_000), renderer.clone());

    let (response, report) = tokio::time::timeout(
        Duration::from_secs(2),
        serve(&engine, &FragmentRequest::get("/async")),
    )
    .await
    .expect("redispatch must not deadlock");

    assert_eq!(response.body_string(), "start-[again]done");
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
}
