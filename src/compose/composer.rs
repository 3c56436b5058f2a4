//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段组合树的节点。
//!
//! 每次渲染（顶层请求、每个 include/forward）对应一个节点。节点按顺序记录输出片段、
//! 响应副作用和子节点，并决定子节点的内容是内联进父节点的快照，还是作为独立的缓存条目。

use super::info::FragmentInfo;
use super::target::DispatchTarget;
use crate::config::FragmentPolicy;
use crate::error::Result;
use crate::esi::EdgeCapability;
use crate::http::{AttributeChanges, OutputMode, SideEffect};
use crate::memento::{AttributeSnapshot, FragmentMemento, MementoEntry, MementoItem};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// 失效标识集合
///
/// 对一个外部可缓存节点，是它自身及所有被折叠进其输出的后代的键、次级标识和模板的并集。
pub type ValueSet = BTreeSet<String>;

/// 节点的缓存状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    #[default]
    NotCached,
    /// 从存储回放
    WasCached,
    /// 本次渲染写入了存储（或委托给了边缘缓存）
    Populated,
}

/// 节点内容项
#[derive(Debug)]
pub enum ContentItem {
    Bytes(Vec<u8>),
    Chars(String),
    SideEffect(SideEffect),
    Child(Box<FragmentComposer>),
}

/// 片段组合节点
#[derive(Debug)]
pub struct FragmentComposer {
    pub(crate) target: DispatchTarget,
    pub(crate) info: FragmentInfo,
    pub(crate) cache_type: CacheType,
    pub(crate) output_mode: OutputMode,
    pub(crate) contents: Vec<ContentItem>,
    /// 是否记录本节点的输出
    pub(crate) capturing: bool,
    /// 子节点渲染期间本节点不记录输出
    pub(crate) child_active: bool,
    pub(crate) ancestor_capturing: bool,
    pub(crate) edge: EdgeCapability,
    /// 某个祖先节点允许边缘委托
    pub(crate) edge_ancestor: bool,
    pub(crate) edge_delegated: bool,
    /// 本节点或后代输出了边缘包含占位符
    pub(crate) has_esi_include: bool,
    pub(crate) value_set: ValueSet,
    /// 最近的带策略节点的策略（自身或祖先），决定内联和属性、Cookie 过滤
    pub(crate) owner_policy: Option<Arc<FragmentPolicy>>,
    pub(crate) attribute_start: usize,
    pub(crate) attribute_cursor: usize,
    pub(crate) render_attributes: AttributeChanges,
    pub(crate) pre_attributes: AttributeChanges,
    pub(crate) post_attributes: AttributeChanges,
    pub(crate) content_type: Option<String>,
    pub(crate) character_encoding: Option<String>,
    /// 命中时回放的快照
    pub(crate) cached: Option<Arc<FragmentMemento>>,
    /// 异步渲染挂起中
    pub(crate) async_pending: bool,
    /// 已转发，之后的输出和副作用被丢弃
    pub(crate) forwarded: bool,
}

impl Default for FragmentComposer {
    fn default() -> Self {
        Self::new(DispatchTarget::request(""))
    }
}

impl FragmentComposer {
    pub fn new(target: DispatchTarget) -> Self {
        Self {
            target,
            info: FragmentInfo::default(),
            cache_type: CacheType::NotCached,
            output_mode: OutputMode::None,
            contents: Vec::new(),
            capturing: false,
            child_active: false,
            ancestor_capturing: false,
            edge: EdgeCapability::None,
            edge_ancestor: false,
            edge_delegated: false,
            has_esi_include: false,
            value_set: ValueSet::new(),
            owner_policy: None,
            attribute_start: 0,
            attribute_cursor: 0,
            render_attributes: AttributeChanges::new(),
            pre_attributes: AttributeChanges::new(),
            post_attributes: AttributeChanges::new(),
            content_type: None,
            character_encoding: None,
            cached: None,
            async_pending: false,
            forwarded: false,
        }
    }

    /// 清空节点，供池复用
    pub fn reset(&mut self) {
        self.target = DispatchTarget::request("");
        self.info = FragmentInfo::default();
        self.cache_type = CacheType::NotCached;
        self.output_mode = OutputMode::None;
        self.contents.clear();
        self.capturing = false;
        self.child_active = false;
        self.ancestor_capturing = false;
        self.edge = EdgeCapability::None;
        self.edge_ancestor = false;
        self.edge_delegated = false;
        self.has_esi_include = false;
        self.value_set.clear();
        self.owner_policy = None;
        self.attribute_start = 0;
        self.attribute_cursor = 0;
        self.render_attributes.clear();
        self.pre_attributes.clear();
        self.post_attributes.clear();
        self.content_type = None;
        self.character_encoding = None;
        self.cached = None;
        self.async_pending = false;
        self.forwarded = false;
    }

    /// 设置节点的缓存信息
    pub fn configure(&mut self, info: FragmentInfo) {
        if let Some(policy) = &info.policy {
            self.owner_policy = Some(policy.clone());
        }
        self.info = info;
    }

    /// 开始记录输出
    ///
    /// 节点自身可缓存，或者某个祖先正在记录（可能内联本节点）时记录。
    pub fn start_capture(&mut self) {
        self.capturing = self.info.is_cacheable() || self.ancestor_capturing;
    }

    pub fn target(&self) -> &DispatchTarget {
        &self.target
    }

    pub fn info(&self) -> &FragmentInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut FragmentInfo {
        &mut self.info
    }

    pub fn cache_type(&self) -> CacheType {
        self.cache_type
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn contents(&self) -> &[ContentItem] {
        &self.contents
    }

    pub fn value_set(&self) -> &ValueSet {
        &self.value_set
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing && !self.child_active && !self.forwarded
    }

    pub fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    /// 转发前丢弃已记录的输出和子节点，只保留副作用
    pub fn discard_output(&mut self) {
        self.contents
            .retain(|item| matches!(item, ContentItem::SideEffect(_)));
    }

    pub fn has_esi_include(&self) -> bool {
        self.has_esi_include
    }

    pub fn is_edge_delegated(&self) -> bool {
        self.edge_delegated
    }

    /// 记录字节输出
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.output_mode.switch_to(OutputMode::Bytes)?;
        if self.is_capturing() {
            if let Some(ContentItem::Bytes(last)) = self.contents.last_mut() {
                last.extend_from_slice(data);
            } else {
                self.contents.push(ContentItem::Bytes(data.to_vec()));
            }
        }
        Ok(())
    }

    /// 记录字符输出
    pub fn write_str(&mut self, data: &str) -> Result<()> {
        self.output_mode.switch_to(OutputMode::Chars)?;
        if self.is_capturing() {
            if let Some(ContentItem::Chars(last)) = self.contents.last_mut() {
                last.push_str(data);
            } else {
                self.contents.push(ContentItem::Chars(data.to_string()));
            }
        }
        Ok(())
    }

    /// 记录响应副作用
    ///
    /// 策略不保存 Cookie 或 Cookie 在排除列表中时，Cookie 副作用不记录。
    pub fn record_side_effect(&mut self, effect: SideEffect) {
        if !self.is_capturing() {
            return;
        }
        if let (Some(name), Some(policy)) = (effect.cookie_name(), &self.owner_policy) {
            if !policy.store_cookies || policy.cookie_exclude.iter().any(|c| c == name) {
                debug!("FragmentComposer: cookie {} not recorded for {}", name, self.target.path);
                return;
            }
        }
        self.contents.push(ContentItem::SideEffect(effect));
    }

    /// 子节点开始渲染
    ///
    /// 子节点继承记录状态、边缘能力和属性策略；本节点在子节点结束前不记录输出。
    pub fn begin_child(&mut self, child: &mut FragmentComposer) {
        self.child_active = true;
        child.ancestor_capturing = self.capturing || self.ancestor_capturing;
        child.edge = self.edge;
        child.edge_ancestor = self.edge_ancestor || self.info.edge_cacheable;
        if !child.info.has_policy() {
            child.owner_policy = self.owner_policy.clone();
        }
    }

    /// 子节点结束渲染
    ///
    /// 按内联规则合并子节点的标识，并把子节点的失效标识集合并入本节点。
    pub fn end_child(&mut self, child: Box<FragmentComposer>) {
        self.child_active = false;
        if self.will_inline(&child) {
            self.info
                .merge_consumed(&child.info.data_ids, &child.info.templates);
        }
        self.value_set.extend(child.value_set.iter().cloned());
        self.value_set.extend(child.own_ids());
        self.has_esi_include |= child.has_esi_include;
        self.contents.push(ContentItem::Child(child));
    }

    /// 子节点的内容是否内联进本节点的快照
    ///
    /// 没有策略的子节点总是内联；标记为不被内联或已委托给边缘缓存的子节点不内联；
    /// 其余情况由最近的带策略节点的内联设置和排除列表决定。
    pub fn will_inline(&self, child: &FragmentComposer) -> bool {
        if !child.info.has_policy() {
            return true;
        }
        if child.info.do_not_consume || child.edge_delegated {
            return false;
        }
        match &self.owner_policy {
            Some(policy) => {
                policy.consume_subfragments
                    && !policy.excludes_child(&child.target.path, child.info.render_class())
            }
            None => false,
        }
    }

    /// 节点自身的键、次级标识和模板
    fn own_ids(&self) -> Vec<String> {
        self.info
            .key
            .iter()
            .chain(self.info.data_ids.iter())
            .chain(self.info.templates.iter())
            .cloned()
            .collect()
    }

    /// 包含自身标识的失效标识集合
    pub fn invalidation_set(&self) -> ValueSet {
        let mut set = self.value_set.clone();
        set.extend(self.own_ids());
        set
    }

    fn inlined_children(&self) -> impl Iterator<Item = &FragmentComposer> + '_ {
        self.contents.iter().filter_map(move |item| match item {
            ContentItem::Child(child) if self.will_inline(child) => Some(child.as_ref()),
            _ => None,
        })
    }

    /// 有效过期时间：自身与被内联后代的最小值
    pub fn effective_expiration(&self) -> Option<i64> {
        self.inlined_children()
            .map(|c| c.effective_expiration())
            .fold(self.info.expiration, |acc, e| match (acc, e) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            })
    }

    /// 有效创建时间：自身与被内联后代的最大值
    pub fn effective_timestamp(&self) -> i64 {
        self.inlined_children()
            .map(|c| c.effective_timestamp())
            .fold(self.info.timestamp, i64::max)
    }

    /// 冻结为快照
    ///
    /// 子节点替换为链接；被内联的子节点内容复制进链接。
    /// 属性快照需要序列化但失败时返回错误，调用方据此把节点标记为不可缓存。
    pub fn to_memento(&self) -> Result<FragmentMemento> {
        if let Some(cached) = &self.cached {
            return Ok(cached.as_ref().clone());
        }
        let snapshot = |changes: &AttributeChanges| -> Result<Option<AttributeSnapshot>> {
            match &self.owner_policy {
                Some(policy) => AttributeSnapshot::capture(changes, policy),
                None => Ok(None),
            }
        };

        let mut contents = Vec::with_capacity(self.contents.len());
        for item in &self.contents {
            contents.push(match item {
                ContentItem::Bytes(b) => MementoItem::Bytes(b.clone()),
                ContentItem::Chars(s) => MementoItem::Chars(s.clone()),
                ContentItem::SideEffect(e) => MementoItem::SideEffect(e.clone()),
                ContentItem::Child(child) => {
                    let content = if self.will_inline(child) {
                        Some(Box::new(child.to_memento()?))
                    } else {
                        None
                    };
                    MementoItem::Link(MementoEntry {
                        target: child.target.clone(),
                        pre_attributes: snapshot(&child.pre_attributes)?,
                        post_attributes: snapshot(&child.post_attributes)?,
                        do_not_consume: child.info.do_not_consume,
                        content,
                    })
                }
            });
        }

        Ok(FragmentMemento {
            template: self.target.path.clone(),
            key: self.info.key.clone(),
            output_mode: self.output_mode,
            content_type: self.content_type.clone(),
            character_encoding: self.character_encoding.clone(),
            attributes: snapshot(&self.render_attributes)?,
            contents,
            expiration: self.effective_expiration(),
            timestamp: self.effective_timestamp(),
        })
    }

    /// 取出所有子节点，供池回收
    pub(crate) fn take_children(&mut self) -> Vec<Box<FragmentComposer>> {
        let mut children = Vec::new();
        for item in self.contents.drain(..) {
            if let ContentItem::Child(child) = item {
                children.push(child);
            }
        }
        children
    }
}
