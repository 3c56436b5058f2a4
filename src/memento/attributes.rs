//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段快照中的请求属性增量。

use crate::config::FragmentPolicy;
use crate::error::{FragmentError, Result};
use crate::http::{AttributeChanges, AttributeMap};
use crate::serialization::{JsonSerializer, Serializer};
use serde::{Deserialize, Serialize};

/// 属性快照
///
/// 共享策略要求跨进程共享时保存序列化字节，否则直接保存活值，避免无谓的序列化开销。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeSnapshot {
    Live(AttributeChanges),
    Serialized(Vec<u8>),
}

impl AttributeSnapshot {
    /// 按策略过滤属性增量并生成快照
    ///
    /// 策略不保存属性或过滤后为空时返回 `None`；需要序列化但失败时返回
    /// [`FragmentError::Serialization`]，调用方据此把所属片段标记为不可缓存。
    pub fn capture(changes: &AttributeChanges, policy: &FragmentPolicy) -> Result<Option<Self>> {
        if !policy.save_attributes {
            return Ok(None);
        }
        let filtered: AttributeChanges = changes
            .iter()
            .filter(|(name, _)| !policy.attribute_exclude.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if filtered.is_empty() {
            return Ok(None);
        }
        if policy.sharing.is_shared() {
            let bytes = JsonSerializer::new().serialize(&filtered)?;
            Ok(Some(AttributeSnapshot::Serialized(bytes)))
        } else {
            Ok(Some(AttributeSnapshot::Live(filtered)))
        }
    }

    /// 将快照恢复到请求属性表
    pub fn restore(&self, attributes: &mut AttributeMap) -> Result<()> {
        match self {
            AttributeSnapshot::Live(changes) => attributes.apply(changes),
            AttributeSnapshot::Serialized(bytes) => {
                let changes: AttributeChanges = JsonSerializer::new()
                    .deserialize(bytes)
                    .map_err(|e| FragmentError::Replay(format!("attribute snapshot: {}", e)))?;
                attributes.apply(&changes);
            }
        }
        Ok(())
    }
}
