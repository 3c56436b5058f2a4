//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段的分派目标（顶层请求、包含或转发）。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 分派方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchKind {
    /// 顶层请求
    Request,
    Include,
    Forward,
}

/// 分派目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTarget {
    /// 目标路径，同时作为策略查找的模板
    pub path: String,
    pub kind: DispatchKind,
    /// 按名称分派时使用的别名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 目标位于其他上下文时的上下文根
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl DispatchTarget {
    fn with_kind(path: &str, kind: DispatchKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            name: None,
            context: None,
            query: None,
        }
    }

    pub fn request(path: &str) -> Self {
        Self::with_kind(path, DispatchKind::Request)
    }

    pub fn include(path: &str) -> Self {
        Self::with_kind(path, DispatchKind::Include)
    }

    pub fn forward(path: &str) -> Self {
        Self::with_kind(path, DispatchKind::Forward)
    }

    /// 通过名称别名分派
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn in_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn is_foreign_context(&self) -> bool {
        self.context.is_some()
    }

    /// 目标身份，用于识别对同一逻辑片段的重复分派
    pub fn identity(&self) -> String {
        format!(
            "{}{}#{}",
            self.context.as_deref().unwrap_or(""),
            self.path,
            self.name.as_deref().unwrap_or("")
        )
    }
}

impl fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            Some(q) => write!(f, "{:?} {}?{}", self.kind, self.path, q),
            None => write!(f, "{:?} {}", self.kind, self.path),
        }
    }
}
