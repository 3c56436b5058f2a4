//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存键和元数据解析器。
//!
//! 解析器按策略中组件的顺序扫描请求，生成缓存键、次级失效标识和需要立即执行的失效。
//! 解析本身是纯函数；立即失效由 [`KeyResolver::apply_invalidations`] 单独施加到存储。

mod component;

use crate::config::{FragmentPolicy, SharingPolicy};
use crate::http::{AttributeMap, RequestView};
use crate::store::FragmentStore;
use tracing::{debug, warn};

/// 片段元数据
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyMetadata {
    /// 超时（秒），小于等于0表示永不过期
    pub timeout: i64,
    pub inactivity: Option<u64>,
    pub priority: u8,
    pub sharing: SharingPolicy,
    pub edge_cacheable: bool,
    pub consume_subfragments: bool,
    pub do_not_consume: bool,
    pub save_attributes: bool,
    pub store_cookies: bool,
    pub consume_exclude: Vec<String>,
    pub attribute_exclude: Vec<String>,
    pub cookie_exclude: Vec<String>,
}

/// 缓存键描述
///
/// 每个片段节点解析一次，之后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheKeyDescriptor {
    /// 缓存键，None 表示本次请求不缓存
    pub key: Option<String>,
    /// 次级失效标识
    pub data_ids: Vec<String>,
    /// 需要立即执行的失效
    pub invalidations: Vec<String>,
    pub metadata: KeyMetadata,
}

impl CacheKeyDescriptor {
    pub fn is_cacheable(&self) -> bool {
        self.key.is_some()
    }
}

/// 组件扫描结果
struct Scan {
    build_id: bool,
    segments: Vec<String>,
    data_ids: Vec<String>,
    invalidations: Vec<String>,
}

/// 缓存键解析器
#[derive(Debug, Clone)]
pub struct KeyResolver {
    default_timeout: i64,
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::new(300)
    }
}

impl KeyResolver {
    /// # 参数
    ///
    /// * `default_timeout` - 策略未指定超时时使用的超时（秒）
    pub fn new(default_timeout: i64) -> Self {
        Self { default_timeout }
    }

    /// 解析缓存键
    ///
    /// # 参数
    ///
    /// * `view` - 请求视图
    /// * `attrs` - 请求属性
    /// * `policy` - 片段策略
    ///
    /// # 返回值
    ///
    /// 返回缓存键描述；存在立即失效、排除命中或必需组件缺失时缓存键为 None
    pub fn resolve(
        &self,
        view: &dyn RequestView,
        attrs: &AttributeMap,
        policy: &FragmentPolicy,
    ) -> CacheKeyDescriptor {
        let scan = scan(view, attrs, policy);
        let metadata = self.metadata(policy);

        if !scan.invalidations.is_empty() {
            debug!(
                "KeyResolver: policy={} queued invalidations {:?}, not cached",
                policy.name, scan.invalidations
            );
            return CacheKeyDescriptor {
                key: None,
                data_ids: Vec::new(),
                invalidations: scan.invalidations,
                metadata,
            };
        }
        if !scan.build_id {
            debug!("KeyResolver: policy={} excluded by components", policy.name);
            return CacheKeyDescriptor {
                metadata,
                ..Default::default()
            };
        }

        let mut key = std::iter::once(policy.name.clone())
            .filter(|name| !name.is_empty())
            .chain(scan.segments)
            .collect::<Vec<_>>()
            .join(":");
        if key.is_empty() {
            return CacheKeyDescriptor {
                metadata,
                ..Default::default()
            };
        }
        if !policy.ignore_char_encoding {
            if let Some(encoding) = view.character_encoding() {
                key.push_str(":charEncoding=");
                key.push_str(encoding);
            }
        }
        if !policy.ignore_get_post {
            key.push_str(":requestType=");
            key.push_str(view.method());
        }
        debug!("KeyResolver: policy={} key={}", policy.name, key);
        CacheKeyDescriptor {
            key: Some(key),
            data_ids: scan.data_ids,
            invalidations: Vec::new(),
            metadata,
        }
    }

    /// 解析由边缘节点回源请求的片段
    ///
    /// 缓存键为回源地址加查询串；组件仍参与排除和失效判断。
    pub fn resolve_external(
        &self,
        view: &dyn RequestView,
        attrs: &AttributeMap,
        policy: &FragmentPolicy,
    ) -> CacheKeyDescriptor {
        let scan = scan(view, attrs, policy);
        let metadata = self.metadata(policy);
        let key = if scan.invalidations.is_empty() && scan.build_id {
            view.query_string()
                .filter(|q| !q.is_empty())
                .map(|q| format!("{}?{}", policy.edge_url(), q))
        } else {
            None
        };
        let data_ids = if key.is_some() {
            scan.data_ids
        } else {
            Vec::new()
        };
        debug!(
            "KeyResolver: external policy={} key={:?}",
            policy.name, key
        );
        CacheKeyDescriptor {
            key,
            data_ids,
            invalidations: scan.invalidations,
            metadata,
        }
    }

    /// 将描述中的立即失效施加到存储
    ///
    /// # 返回值
    ///
    /// 返回被失效的条目总数
    pub async fn apply_invalidations(
        &self,
        store: &dyn FragmentStore,
        descriptor: &CacheKeyDescriptor,
    ) -> usize {
        let mut total = 0;
        for id in &descriptor.invalidations {
            match store.invalidate(id, true).await {
                Ok(count) => total += count,
                Err(e) => warn!("KeyResolver: invalidation of {} failed: {}", id, e),
            }
        }
        total
    }

    /// 解析缓存键并立即施加失效
    pub async fn resolve_and_invalidate(
        &self,
        view: &dyn RequestView,
        attrs: &AttributeMap,
        policy: &FragmentPolicy,
        store: &dyn FragmentStore,
    ) -> CacheKeyDescriptor {
        let descriptor = self.resolve(view, attrs, policy);
        self.apply_invalidations(store, &descriptor).await;
        descriptor
    }

    fn metadata(&self, policy: &FragmentPolicy) -> KeyMetadata {
        KeyMetadata {
            timeout: policy.timeout.unwrap_or(self.default_timeout),
            inactivity: policy.inactivity,
            priority: policy.priority,
            sharing: policy.sharing,
            edge_cacheable: policy.edge_cacheable,
            consume_subfragments: policy.consume_subfragments,
            do_not_consume: policy.do_not_consume,
            save_attributes: policy.save_attributes,
            store_cookies: policy.store_cookies,
            consume_exclude: policy.consume_exclude.clone(),
            attribute_exclude: policy.attribute_exclude.clone(),
            cookie_exclude: policy.cookie_exclude.clone(),
        }
    }
}

/// 扫描全部组件
///
/// 排除命中或必需组件缺失只会关闭缓存键的生成，不会中止扫描，
/// 后续组件的失效标识仍然需要收集。
fn scan(view: &dyn RequestView, attrs: &AttributeMap, policy: &FragmentPolicy) -> Scan {
    let mut scan = Scan {
        build_id: true,
        segments: Vec::new(),
        data_ids: Vec::new(),
        invalidations: Vec::new(),
    };

    for c in &policy.components {
        let label = component::label(c);
        let value = match component::evaluate(c, view, attrs) {
            Ok(value) => value,
            Err(e) if c.required => {
                debug!("KeyResolver: required component {} failed: {}", label, e);
                scan.build_id = false;
                continue;
            }
            Err(e) => {
                debug!("KeyResolver: optional component {} ignored: {}", label, e);
                continue;
            }
        };
        let Some(value) = value else {
            if c.required {
                debug!("KeyResolver: required component {} missing", label);
                scan.build_id = false;
            }
            continue;
        };

        if let Some(id) = &c.invalidate {
            scan.invalidations.push(format!("{}={}", id, value));
        }
        let excluded = c.not_values.contains(&value)
            || (!c.values.is_empty() && !c.values.contains(&value));
        if excluded {
            debug!("KeyResolver: component {}={} excluded", label, value);
            scan.build_id = false;
            continue;
        }
        if let Some(id) = &c.data_id {
            scan.data_ids.push(format!("{}={}", id, value));
        }
        if c.in_key {
            scan.segments.push(if c.ignore_value {
                label.to_string()
            } else {
                format!("{}={}", label, value)
            });
        }
    }
    scan
}
