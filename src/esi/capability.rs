//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了边缘缓存能力协商。

use serde::{Deserialize, Serialize};

/// 请求方声明的边缘（ESI）能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeCapability {
    #[default]
    None,
    V1_0,
    V1_0Plus,
    V0_9,
    V0_8,
}

impl EdgeCapability {
    /// 从能力声明头解析，按子串匹配
    pub fn negotiate(header: Option<&str>) -> Self {
        let Some(value) = header else {
            return EdgeCapability::None;
        };
        if value.contains("ESI/1.0+") {
            EdgeCapability::V1_0Plus
        } else if value.contains("ESI/1.0") {
            EdgeCapability::V1_0
        } else if value.contains("ESI/0.9") {
            EdgeCapability::V0_9
        } else if value.contains("ESI/0.8") {
            EdgeCapability::V0_8
        } else {
            EdgeCapability::None
        }
    }

    /// 是否声明了任意 ESI 能力
    pub fn is_present(&self) -> bool {
        !matches!(self, EdgeCapability::None)
    }

    /// 边缘节点能否处理 include 占位符
    pub fn supports_include(&self) -> bool {
        matches!(self, EdgeCapability::V1_0 | EdgeCapability::V1_0Plus)
    }
}
