//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了发往边缘节点的缓存指令（类似 `Surrogate-Control`）。

use crate::http::ResponseSink;
use tracing::debug;

/// ESI 内容标记
pub const ESI_CONTENT: &str = "content=\"ESI/1.0\"";

/// 构造缓存指令所需的节点状态
#[derive(Debug, Clone, Copy)]
pub struct DirectiveParams<'a> {
    pub edge_cacheable: bool,
    pub cacheable: bool,
    /// 渲染出错
    pub failed: bool,
    pub has_esi_include: bool,
    /// 过期时间（毫秒时间戳）
    pub expiration: Option<i64>,
    pub key: Option<&'a str>,
    pub data_ids: &'a [String],
}

/// 构造缓存指令
///
/// 节点不允许边缘缓存、不可缓存或渲染出错时为 `no-store`；否则为
/// `max-age=<秒>`，并附带缓存键和次级标识作为 `depid`。
///
/// # 参数
///
/// * `params` - 节点状态
/// * `now` - 当前时间（毫秒时间戳）
/// * `ceiling` - max-age 上限（秒），节点无过期时间时直接使用
pub fn build_directive(params: &DirectiveParams<'_>, now: i64, ceiling: u64) -> String {
    let mut parts = Vec::new();
    if !params.edge_cacheable || !params.cacheable || params.failed {
        parts.push("no-store".to_string());
        if params.has_esi_include {
            parts.push(ESI_CONTENT.to_string());
        }
        return parts.join(",");
    }

    let max_age = match params.expiration {
        Some(at) => (((at - now).max(0) / 1000) as u64).min(ceiling),
        None => ceiling,
    };
    parts.push(format!("max-age={}", max_age));
    if params.has_esi_include {
        parts.push(ESI_CONTENT.to_string());
    }
    if let Some(key) = params.key {
        parts.push(format!("depid=\"{}\"", key));
    }
    for id in params.data_ids {
        parts.push(format!("depid=\"{}\"", id));
    }
    parts.join(",")
}

/// 写出缓存指令
///
/// 响应已提交，或已存在指令且不要求覆盖时不写出。
///
/// # 返回值
///
/// 返回是否写出
pub fn emit_directive(sink: &mut dyn ResponseSink, header: &str, value: &str, force: bool) -> bool {
    if sink.is_committed() {
        debug!("emit_directive: response committed, {} not set", header);
        return false;
    }
    if !force && sink.header(header).is_some() {
        debug!("emit_directive: {} already present", header);
        return false;
    }
    sink.set_header(header, value);
    true
}
