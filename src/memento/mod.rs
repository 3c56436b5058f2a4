//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段的可存储快照（memento）及其回放逻辑。
//!
//! 快照是一个扁平的内容列表：文本片段、响应副作用，以及指向子片段的链接。
//! 被父片段内联的子片段，其内容直接保存在链接中；否则链接为空，回放时重新分派。

pub mod attributes;
pub mod replay;

use crate::compose::DispatchTarget;
use crate::error::Result;
use crate::http::{OutputMode, SideEffect};
use crate::serialization::{JsonSerializer, Serializer};
use serde::{Deserialize, Serialize};

pub use attributes::AttributeSnapshot;
pub use replay::{replay, LinkDispatcher, ReplayStats};

/// 片段快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentMemento {
    /// 片段模板（分派路径）
    pub template: String,
    pub key: Option<String>,
    pub output_mode: OutputMode,
    /// 渲染时在响应提交前设置的内容类型
    pub content_type: Option<String>,
    pub character_encoding: Option<String>,
    /// 渲染期间改动过的请求属性
    pub attributes: Option<AttributeSnapshot>,
    pub contents: Vec<MementoItem>,
    /// 过期时间（毫秒时间戳），None 表示永不过期
    pub expiration: Option<i64>,
    /// 创建时间（毫秒时间戳）
    pub timestamp: i64,
}

/// 快照内容项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MementoItem {
    Bytes(Vec<u8>),
    Chars(String),
    SideEffect(SideEffect),
    Link(MementoEntry),
}

/// 子片段链接
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MementoEntry {
    pub target: DispatchTarget,
    /// 分派前父片段改动的属性
    #[serde(default)]
    pub pre_attributes: Option<AttributeSnapshot>,
    /// 子片段渲染期间改动的属性
    #[serde(default)]
    pub post_attributes: Option<AttributeSnapshot>,
    #[serde(default)]
    pub do_not_consume: bool,
    /// 仅当父片段内联该子片段时存在
    #[serde(default)]
    pub content: Option<Box<FragmentMemento>>,
}

impl MementoEntry {
    pub fn is_inlined(&self) -> bool {
        self.content.is_some()
    }
}

impl FragmentMemento {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
            key: None,
            output_mode: OutputMode::None,
            content_type: None,
            character_encoding: None,
            attributes: None,
            contents: Vec::new(),
            expiration: None,
            timestamp: 0,
        }
    }

    /// 序列化为存储字节
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        JsonSerializer::with_compression().serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        JsonSerializer::with_compression().deserialize(data)
    }

    /// 展开整棵子树的文本内容
    ///
    /// 存在未内联的链接时返回 `None`，因为这部分内容只能通过重新分派得到。
    pub fn flatten(&self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        self.flatten_into(&mut out).then_some(out)
    }

    fn flatten_into(&self, out: &mut Vec<u8>) -> bool {
        for item in &self.contents {
            match item {
                MementoItem::Bytes(b) => out.extend_from_slice(b),
                MementoItem::Chars(s) => out.extend_from_slice(s.as_bytes()),
                MementoItem::SideEffect(_) => {}
                MementoItem::Link(link) => match &link.content {
                    Some(content) => {
                        if !content.flatten_into(out) {
                            return false;
                        }
                    }
                    None => return false,
                },
            }
        }
        true
    }

    /// 链接数量（包括内联链接中的嵌套链接）
    pub fn link_count(&self) -> usize {
        self.contents
            .iter()
            .map(|item| match item {
                MementoItem::Link(link) => {
                    1 + link.content.as_ref().map_or(0, |c| c.link_count())
                }
                _ => 0,
            })
            .sum()
    }

    /// 快照中记录的 Cookie 副作用名称
    pub fn cookie_names(&self) -> Vec<&str> {
        self.contents
            .iter()
            .filter_map(|item| match item {
                MementoItem::SideEffect(effect) => effect.cookie_name(),
                _ => None,
            })
            .collect()
    }
}
