//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段节点的缓存信息。

use crate::config::{FragmentPolicy, SharingPolicy};
use crate::key::CacheKeyDescriptor;
use crate::store::EntryMetadata;
use std::sync::Arc;

/// 片段缓存信息
///
/// 没有策略的节点也持有一个默认的 `FragmentInfo`，用于向上传递被内联子片段的标识。
#[derive(Debug, Clone, Default)]
pub struct FragmentInfo {
    pub policy: Option<Arc<FragmentPolicy>>,
    pub key: Option<String>,
    /// 次级失效标识，包含被内联子片段的标识
    pub data_ids: Vec<String>,
    /// 模板，包含被内联子片段的模板
    pub templates: Vec<String>,
    /// 过期时间（毫秒时间戳），None 表示永不过期
    pub expiration: Option<i64>,
    /// 创建时间（毫秒时间戳）
    pub timestamp: i64,
    pub priority: u8,
    pub sharing: SharingPolicy,
    pub inactivity: Option<u64>,
    pub edge_cacheable: bool,
    pub external_cache: Option<String>,
    pub consume_subfragments: bool,
    pub do_not_consume: bool,
    /// 键解析后被判定为不可缓存（属性序列化失败、渲染标记等）
    pub uncacheable: bool,
}

impl FragmentInfo {
    /// 根据策略和缓存键描述创建
    ///
    /// # 参数
    ///
    /// * `policy` - 片段策略
    /// * `descriptor` - 缓存键描述
    /// * `template` - 片段模板
    /// * `now` - 当前时间（毫秒时间戳）
    pub fn from_descriptor(
        policy: Arc<FragmentPolicy>,
        descriptor: &CacheKeyDescriptor,
        template: &str,
        now: i64,
    ) -> Self {
        let meta = &descriptor.metadata;
        let expiration = (meta.timeout > 0).then(|| now + meta.timeout * 1000);
        Self {
            key: descriptor.key.clone(),
            data_ids: descriptor.data_ids.clone(),
            templates: vec![template.to_string()],
            expiration,
            timestamp: now,
            priority: meta.priority,
            sharing: meta.sharing,
            inactivity: meta.inactivity,
            edge_cacheable: meta.edge_cacheable,
            external_cache: policy.external_cache.clone(),
            consume_subfragments: meta.consume_subfragments,
            do_not_consume: meta.do_not_consume,
            uncacheable: false,
            policy: Some(policy),
        }
    }

    pub fn has_policy(&self) -> bool {
        self.policy.is_some()
    }

    pub fn is_cacheable(&self) -> bool {
        self.key.is_some() && !self.uncacheable
    }

    /// 是否需要把整棵子树推送到外部缓存
    pub fn is_externalizable(&self) -> bool {
        self.external_cache.is_some() && self.is_cacheable()
    }

    pub fn render_class(&self) -> Option<&str> {
        self.policy.as_ref().and_then(|p| p.render_class.as_deref())
    }

    /// 合并被内联子片段的标识
    pub fn merge_consumed(&mut self, data_ids: &[String], templates: &[String]) {
        for id in data_ids {
            if !self.data_ids.contains(id) {
                self.data_ids.push(id.clone());
            }
        }
        for template in templates {
            if !self.templates.contains(template) {
                self.templates.push(template.clone());
            }
        }
    }

    /// 命中时以存储条目的元数据为准
    ///
    /// 条目可能由其他请求创建，过期时间和标识不能从策略重新推导。
    pub fn refresh_from_entry(&mut self, metadata: &EntryMetadata) {
        self.expiration = metadata.expiration;
        self.timestamp = metadata.timestamp;
        self.data_ids = metadata.data_ids.clone();
        self.templates = metadata.templates.clone();
    }

    /// 生成写入存储的元数据
    pub fn entry_metadata(&self, expiration: Option<i64>, timestamp: i64) -> EntryMetadata {
        EntryMetadata {
            expiration,
            timestamp,
            priority: self.priority,
            sharing: self.sharing,
            inactivity: self.inactivity,
            data_ids: self.data_ids.clone(),
            templates: self.templates.clone(),
        }
    }
}
