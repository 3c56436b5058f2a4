//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了边缘缓存（ESI）支持：能力协商、委托判断、包含占位符和缓存指令。

pub mod capability;
pub mod directive;
pub mod include;
pub mod registry;

use crate::config::EsiConfig;

pub use capability::EdgeCapability;
pub use directive::{build_directive, emit_directive, DirectiveParams};
pub use include::{build_include, include_src};
pub use registry::EsiRegistry;

/// 是否把片段委托给边缘节点
///
/// # 参数
///
/// * `config` - ESI 配置
/// * `capability` - 请求声明的边缘能力
/// * `edge_cacheable` - 片段是否允许边缘缓存
/// * `top_level` - 片段是否就是边缘节点请求的页面
/// * `marker` - 请求中标记参数的取值（边缘回源时存在）
/// * `edge_url` - 片段的回源地址
pub fn should_delegate(
    config: &EsiConfig,
    capability: EdgeCapability,
    edge_cacheable: bool,
    top_level: bool,
    marker: Option<&str>,
    edge_url: &str,
) -> bool {
    config.enabled
        && edge_cacheable
        && capability.supports_include()
        && !top_level
        && marker != Some(edge_url)
}
