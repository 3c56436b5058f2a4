//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段快照的回放逻辑。

use super::{FragmentMemento, MementoItem};
use crate::compose::{DispatchKind, DispatchTarget};
use crate::error::{FragmentError, Result};
use crate::http::{AttributeMap, OutputMode, ResponseSink};
use crate::metrics::GLOBAL_METRICS;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

/// 未内联链接的分派接口
///
/// 回放遇到未内联的子片段链接时，通过该接口让协作方重新执行子片段，
/// 子片段的渲染最终会再次进入片段缓存引擎。
#[async_trait]
pub trait LinkDispatcher: Send {
    async fn dispatch(
        &mut self,
        target: &DispatchTarget,
        attrs: &mut AttributeMap,
        sink: &mut dyn ResponseSink,
    ) -> Result<()>;
}

/// 回放统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub chunks: usize,
    pub side_effects: usize,
    /// 因响应已提交或施加失败而跳过的副作用
    pub skipped_side_effects: usize,
    pub inlined: usize,
    pub dispatched: usize,
    pub forwards: usize,
}

/// 将快照回放到响应
///
/// 回放本身不做任何缓存决策，给定相同的快照和等价的属性状态，输出是确定的。
/// 输出模式不匹配是致命错误；副作用在响应已提交时跳过并记录日志。
///
/// # 参数
///
/// * `memento` - 片段快照
/// * `attrs` - 请求属性表
/// * `sink` - 响应输出
/// * `dispatcher` - 未内联链接的分派接口
///
/// # 返回值
///
/// 返回回放统计
pub fn replay<'a>(
    memento: &'a FragmentMemento,
    attrs: &'a mut AttributeMap,
    sink: &'a mut dyn ResponseSink,
    dispatcher: &'a mut dyn LinkDispatcher,
) -> BoxFuture<'a, Result<ReplayStats>> {
    async move {
        let mut stats = ReplayStats::default();
        replay_node(memento, attrs, sink, dispatcher, &mut stats).await?;
        debug!(
            "replay: template={}, chunks={}, side_effects={}, skipped={}, inlined={}, dispatched={}",
            memento.template,
            stats.chunks,
            stats.side_effects,
            stats.skipped_side_effects,
            stats.inlined,
            stats.dispatched
        );
        Ok(stats)
    }
    .boxed()
}

fn replay_node<'a>(
    memento: &'a FragmentMemento,
    attrs: &'a mut AttributeMap,
    sink: &'a mut dyn ResponseSink,
    dispatcher: &'a mut dyn LinkDispatcher,
    stats: &'a mut ReplayStats,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if let Some(snapshot) = &memento.attributes {
            snapshot.restore(attrs)?;
        }
        if !sink.is_committed() {
            if let Some(content_type) = &memento.content_type {
                sink.set_content_type(content_type);
            }
            if let Some(encoding) = &memento.character_encoding {
                sink.set_character_encoding(encoding);
            }
        }

        for item in &memento.contents {
            match item {
                MementoItem::Bytes(data) => {
                    check_mode(memento, OutputMode::Bytes)?;
                    sink.write_bytes(data).map_err(as_replay_error)?;
                    stats.chunks += 1;
                }
                MementoItem::Chars(text) => {
                    check_mode(memento, OutputMode::Chars)?;
                    sink.write_str(text).map_err(as_replay_error)?;
                    stats.chunks += 1;
                }
                MementoItem::SideEffect(effect) => {
                    if sink.is_committed() {
                        debug!(
                            "replay: response committed, skipping side effect {:?} of {}",
                            effect, memento.template
                        );
                        GLOBAL_METRICS.record_request(&memento.template, "replay", "side_effect_skipped");
                        stats.skipped_side_effects += 1;
                    } else if let Err(e) = effect.apply(sink) {
                        warn!(
                            "replay: side effect {:?} of {} not applied: {}",
                            effect, memento.template, e
                        );
                        stats.skipped_side_effects += 1;
                    } else {
                        stats.side_effects += 1;
                    }
                }
                MementoItem::Link(link) => {
                    let forward = link.target.kind == DispatchKind::Forward;
                    if forward && !sink.reset_buffer() {
                        warn!(
                            "replay: response committed before forward to {} in {}",
                            link.target, memento.template
                        );
                        GLOBAL_METRICS.record_request(
                            &memento.template,
                            "replay",
                            "forward_after_commit",
                        );
                    }
                    if let Some(pre) = &link.pre_attributes {
                        pre.restore(attrs)?;
                    }
                    match &link.content {
                        Some(content) => {
                            replay_node(content, attrs, sink, dispatcher, stats).await?;
                            stats.inlined += 1;
                        }
                        None => {
                            dispatcher.dispatch(&link.target, attrs, sink).await?;
                            stats.dispatched += 1;
                        }
                    }
                    if let Some(post) = &link.post_attributes {
                        post.restore(attrs)?;
                    }
                    if forward {
                        // 转发之后的内容不会出现在响应中
                        stats.forwards += 1;
                        break;
                    }
                }
            }
        }
        Ok(())
    }
    .boxed()
}

fn check_mode(memento: &FragmentMemento, chunk: OutputMode) -> Result<()> {
    if memento.output_mode != chunk {
        return Err(FragmentError::Replay(format!(
            "{} recorded {:?} output but holds a {:?} chunk",
            memento.template, memento.output_mode, chunk
        )));
    }
    Ok(())
}

fn as_replay_error(e: FragmentError) -> FragmentError {
    match e {
        FragmentError::OutputMode(msg) => FragmentError::Replay(msg),
        other => other,
    }
}
