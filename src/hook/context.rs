//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了传给协作渲染器的渲染上下文。

use super::engine::FragmentCacheEngine;
use super::scope::RequestScope;
use super::RenderStatus;
use crate::compose::{DispatchKind, DispatchTarget, FragmentComposer};
use crate::error::{FragmentError, Result};
use crate::http::{AttributeMap, AttributeValue, Cookie, RequestView, ResponseSink, SideEffect};
use tracing::{debug, warn};

/// 渲染上下文
///
/// 渲染器写出的内容同时进入响应和当前组合节点；响应元数据的修改立即施加到响应，
/// 并作为副作用记录下来供回放。
pub struct RenderContext<'a> {
    pub(crate) engine: &'a FragmentCacheEngine,
    pub(crate) scope: &'a RequestScope,
    pub(crate) view: &'a dyn RequestView,
    pub(crate) attrs: &'a mut AttributeMap,
    pub(crate) sink: &'a mut dyn ResponseSink,
    pub(crate) node: &'a mut FragmentComposer,
    pub(crate) uncacheable: bool,
    pub(crate) redispatched: bool,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        engine: &'a FragmentCacheEngine,
        scope: &'a RequestScope,
        view: &'a dyn RequestView,
        attrs: &'a mut AttributeMap,
        sink: &'a mut dyn ResponseSink,
        node: &'a mut FragmentComposer,
    ) -> Self {
        Self {
            engine,
            scope,
            view,
            attrs,
            sink,
            node,
            uncacheable: false,
            redispatched: false,
        }
    }

    pub fn request(&self) -> &dyn RequestView {
        self.view
    }

    pub fn target(&self) -> &DispatchTarget {
        self.node.target()
    }

    pub fn scope(&self) -> &RequestScope {
        self.scope
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attrs.get(name)
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.attrs.set(name, value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.attrs.remove(name)
    }

    pub fn is_committed(&self) -> bool {
        self.sink.is_committed()
    }

    pub fn status(&self) -> u16 {
        self.sink.status()
    }

    /// 当前节点在异步挂起期间被再次分派到自身
    pub fn is_redispatched(&self) -> bool {
        self.redispatched
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.discarded("output") {
            return Ok(());
        }
        self.node.write_bytes(data)?;
        self.sink.write_bytes(data)
    }

    pub fn write_str(&mut self, data: &str) -> Result<()> {
        if self.discarded("output") {
            return Ok(());
        }
        self.node.write_str(data)?;
        self.sink.write_str(data)
    }

    /// 转发之后本节点不再产生响应
    fn discarded(&self, what: &str) -> bool {
        if self.node.is_forwarded() {
            debug!("RenderContext: {} of {} after forward discarded", what, self.node.target());
        }
        self.node.is_forwarded()
    }

    fn side_effect(&mut self, effect: SideEffect) -> Result<()> {
        if self.discarded("side effect") {
            return Ok(());
        }
        effect.apply(self.sink)?;
        self.node.record_side_effect(effect);
        Ok(())
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.side_effect(SideEffect::Header {
            name: name.to_string(),
            value: value.to_string(),
            add: false,
        })
    }

    pub fn add_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.side_effect(SideEffect::Header {
            name: name.to_string(),
            value: value.to_string(),
            add: true,
        })
    }

    pub fn set_int_header(&mut self, name: &str, value: i64) -> Result<()> {
        self.side_effect(SideEffect::IntHeader {
            name: name.to_string(),
            value,
            add: false,
        })
    }

    pub fn set_date_header(&mut self, name: &str, millis: i64) -> Result<()> {
        self.side_effect(SideEffect::DateHeader {
            name: name.to_string(),
            millis,
            add: false,
        })
    }

    pub fn add_cookie(&mut self, cookie: Cookie) -> Result<()> {
        self.side_effect(SideEffect::AddCookie(cookie))
    }

    pub fn set_status(&mut self, code: u16) -> Result<()> {
        self.side_effect(SideEffect::Status { code })
    }

    pub fn set_content_length(&mut self, length: u64) -> Result<()> {
        self.side_effect(SideEffect::ContentLength(length))
    }

    pub fn set_locale(&mut self, locale: &str) -> Result<()> {
        self.side_effect(SideEffect::Locale(locale.to_string()))
    }

    pub fn send_redirect(&mut self, location: &str) -> Result<()> {
        self.side_effect(SideEffect::Redirect(location.to_string()))
    }

    /// 设置内容类型
    ///
    /// 只有响应头尚未发送时才进入节点快照。
    pub fn set_content_type(&mut self, content_type: &str) {
        if !self.sink.is_committed() {
            self.node.content_type = Some(content_type.to_string());
        }
        self.sink.set_content_type(content_type);
    }

    pub fn set_character_encoding(&mut self, encoding: &str) {
        if !self.sink.is_committed() {
            self.node.character_encoding = Some(encoding.to_string());
        }
        self.sink.set_character_encoding(encoding);
    }

    /// 标记本次渲染结果不可缓存
    pub fn mark_uncacheable(&mut self) {
        self.uncacheable = true;
    }

    /// 包含子片段
    pub async fn include(&mut self, target: DispatchTarget) -> Result<()> {
        if target.kind == DispatchKind::Forward {
            return self.forward(target).await;
        }
        self.dispatch(target).await
    }

    /// 转发到子片段
    ///
    /// 未提交的输出和本节点已记录的内容被丢弃，转发返回后本节点的输出也被丢弃。
    /// 响应已提交时返回渲染错误。
    pub async fn forward(&mut self, mut target: DispatchTarget) -> Result<()> {
        target.kind = DispatchKind::Forward;
        if !self.sink.reset_buffer() {
            return Err(FragmentError::Render(format!(
                "cannot forward to {} after the response is committed",
                target
            )));
        }
        self.node.discard_output();
        let result = self.dispatch(target).await;
        self.node.forwarded = true;
        result
    }

    async fn dispatch(&mut self, target: DispatchTarget) -> Result<()> {
        if self.node.async_pending && target.identity() == self.node.target().identity() {
            warn!(
                "RenderContext[{}]: {} dispatched into itself while suspended, rendering in place",
                self.scope.id(),
                target
            );
            self.redispatched = true;
            let renderer = self.engine.renderer();
            return match renderer.render(self).await? {
                RenderStatus::Complete => Ok(()),
                RenderStatus::Uncacheable => {
                    self.uncacheable = true;
                    Ok(())
                }
                RenderStatus::Suspended(_) => Err(FragmentError::Render(format!(
                    "{} suspended again during re-entrant dispatch",
                    target
                ))),
            };
        }
        self.engine
            .dispatch_child(
                self.scope,
                self.view,
                &mut *self.attrs,
                &mut *self.sink,
                &mut *self.node,
                target,
            )
            .await
    }
}
