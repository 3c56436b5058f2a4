//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了请求属性表及其变更日志，用于计算片段渲染期间的属性增量。

use serde::de::Deserializer;
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// 属性增量：名称到新值的映射，`None` 表示该属性被移除
pub type AttributeChanges = BTreeMap<String, Option<AttributeValue>>;

/// 请求属性值
///
/// `Json` 值可以跨进程共享；`Opaque` 值只能以活对象形式保存在本进程内，
/// 对其序列化会失败。
#[derive(Clone)]
pub enum AttributeValue {
    /// 可序列化的值
    Json(serde_json::Value),
    /// 进程内的不透明对象
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl AttributeValue {
    /// 以 JSON 形式查看属性值
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            AttributeValue::Json(v) => Some(v),
            AttributeValue::Opaque(_) => None,
        }
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        AttributeValue::Json(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Json(serde_json::Value::String(value.to_string()))
    }
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Json(v) => write!(f, "Json({})", v),
            AttributeValue::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttributeValue::Json(a), AttributeValue::Json(b)) => a == b,
            (AttributeValue::Opaque(a), AttributeValue::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AttributeValue::Json(v) => v.serialize(serializer),
            AttributeValue::Opaque(_) => Err(S::Error::custom(
                "opaque request attribute cannot be serialized",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(AttributeValue::Json)
    }
}

/// 请求属性表
///
/// 每次写入都会追加到变更日志，`mark` / `changes_since` 据此计算某段渲染期间
/// 被改动过的属性集合。
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    values: HashMap<String, AttributeValue>,
    journal: Vec<String>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        let name = name.into();
        self.journal.push(name.clone());
        self.values.insert(name, value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.journal.push(name.to_string());
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 返回当前变更日志位置
    pub fn mark(&self) -> usize {
        self.journal.len()
    }

    /// 计算自 `mark` 以来被改动过的属性及其当前值
    pub fn changes_since(&self, mark: usize) -> AttributeChanges {
        let start = mark.min(self.journal.len());
        self.journal[start..]
            .iter()
            .map(|name| (name.clone(), self.values.get(name).cloned()))
            .collect()
    }

    /// 将属性增量应用到当前属性表
    pub fn apply(&mut self, changes: &AttributeChanges) {
        for (name, value) in changes {
            match value {
                Some(v) => self.set(name.clone(), v.clone()),
                None => {
                    self.remove(name);
                }
            }
        }
    }
}
