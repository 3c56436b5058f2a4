//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了边缘包含占位符的构造。

use crate::config::EsiConfig;

/// 边缘节点回源地址
///
/// 形如 `{edge_url}?{query}&{marker}={edge_url}`，已有的标记参数会被去掉。
pub fn include_src(edge_url: &str, query: Option<&str>, marker: &str) -> String {
    let query: Vec<&str> = query
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split('=').next() != Some(marker))
        .collect();
    if query.is_empty() {
        format!("{}?{}={}", edge_url, marker, edge_url)
    } else {
        format!("{}?{}&{}={}", edge_url, query.join("&"), marker, edge_url)
    }
}

/// 生成包含占位符
pub fn build_include(config: &EsiConfig, edge_url: &str, query: Option<&str>) -> String {
    let src = include_src(edge_url, query, &config.marker_param);
    config.include_template.replace("{src}", &src)
}
