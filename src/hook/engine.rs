//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段缓存引擎，负责每个组合节点的查找、回放、渲染和写入。

use super::context::RenderContext;
use super::scope::{IncludedRequest, RequestScope};
use super::{AsyncContinuation, FragmentReport, RenderStatus, Renderer};
use crate::compose::{CacheType, ComposerPool, DispatchTarget, FragmentComposer, FragmentInfo, ValueSet};
use crate::config::{Config, FragmentPolicy};
use crate::error::{FragmentError, Result};
use crate::esi::{self, build_directive, build_include, DirectiveParams, EdgeCapability, EsiRegistry};
use crate::external::{ExternalCacheRegistry, ExternalEntry};
use crate::http::{AttributeMap, RequestView, ResponseSink};
use crate::key::KeyResolver;
use crate::memento::{replay, FragmentMemento, LinkDispatcher};
use crate::metrics::GLOBAL_METRICS;
use crate::store::{CacheEntry, FragmentStore, PinGuard};
use crate::utils::{now_millis, query_param};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// 推送到外部缓存时携带的响应头
const EXTERNAL_HEADERS: [&str; 5] = [
    "Content-Encoding",
    "Content-Language",
    "ETag",
    "Expires",
    "Cache-Control",
];

/// 随策略重新加载一起替换的设置
struct EngineSettings {
    config: Config,
    by_template: HashMap<String, Arc<FragmentPolicy>>,
    by_edge_url: HashMap<String, Arc<FragmentPolicy>>,
    resolver: KeyResolver,
}

impl EngineSettings {
    fn build(config: Config) -> Result<Self> {
        config.validate().map_err(FragmentError::Config)?;
        let mut by_template = HashMap::new();
        let mut by_edge_url = HashMap::new();
        for policy in &config.policies {
            let policy = Arc::new(policy.clone());
            by_edge_url.insert(policy.edge_url().to_string(), policy.clone());
            by_template.insert(policy.template.clone(), policy);
        }
        let resolver = KeyResolver::new(config.global.default_timeout);
        Ok(Self {
            config,
            by_template,
            by_edge_url,
            resolver,
        })
    }

    fn policy(&self, template: &str) -> Option<Arc<FragmentPolicy>> {
        self.by_template.get(template).cloned()
    }
}

/// 片段缓存引擎
///
/// 引擎本身不持有任何按请求变化的状态；组合节点沿渲染调用链显式传递，
/// 同一缓存键的并发渲染通过存储的 `pin` / `unpin` 串行化。
pub struct FragmentCacheEngine {
    settings: RwLock<Arc<EngineSettings>>,
    store: Arc<dyn FragmentStore>,
    renderer: Arc<dyn Renderer>,
    esi_registry: Arc<EsiRegistry>,
    external: Option<Arc<ExternalCacheRegistry>>,
    pool: ComposerPool,
}

impl FragmentCacheEngine {
    /// 创建引擎
    ///
    /// # 参数
    ///
    /// * `config` - 引擎配置，创建前会先校验
    /// * `store` - 片段存储
    /// * `renderer` - 协作渲染器
    ///
    /// # 返回值
    ///
    /// 配置无效时返回 [`FragmentError::Config`]
    pub fn new(config: Config, store: Arc<dyn FragmentStore>, renderer: Arc<dyn Renderer>) -> Result<Self> {
        let settings = EngineSettings::build(config)?;
        let external = if settings.config.external.groups.is_empty() {
            None
        } else {
            let registry = Arc::new(ExternalCacheRegistry::from_config(&settings.config.external));
            store.add_listener(registry.clone());
            Some(registry)
        };
        let pool = ComposerPool::new(settings.config.global.pool_size);
        info!(
            "FragmentCacheEngine: {} policies loaded, external groups={}",
            settings.by_template.len(),
            settings.config.external.groups.len()
        );
        Ok(Self {
            settings: RwLock::new(Arc::new(settings)),
            store,
            renderer,
            esi_registry: Arc::new(EsiRegistry::new()),
            external,
            pool,
        })
    }

    /// 使用外部创建的边缘地址注册表
    pub fn with_esi_registry(mut self, registry: Arc<EsiRegistry>) -> Self {
        self.esi_registry = registry;
        self
    }

    fn settings(&self) -> Arc<EngineSettings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self) -> &Arc<dyn FragmentStore> {
        &self.store
    }

    pub fn renderer(&self) -> Arc<dyn Renderer> {
        self.renderer.clone()
    }

    pub fn esi_registry(&self) -> &Arc<EsiRegistry> {
        &self.esi_registry
    }

    pub fn external(&self) -> Option<&Arc<ExternalCacheRegistry>> {
        self.external.as_ref()
    }

    pub fn pool(&self) -> &ComposerPool {
        &self.pool
    }

    pub fn policy(&self, template: &str) -> Option<Arc<FragmentPolicy>> {
        self.settings().policy(template)
    }

    /// 重新加载策略
    ///
    /// 边缘地址注册表随之清空；外部缓存组和已有连接保持不变。
    pub fn reload_policies(&self, config: Config) -> Result<()> {
        let settings = EngineSettings::build(config)?;
        let count = settings.by_template.len();
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(settings);
        self.esi_registry.clear();
        info!("FragmentCacheEngine: reloaded {} policies", count);
        Ok(())
    }

    /// 按缓存键或次级标识失效
    pub async fn invalidate(&self, id: &str, wait: bool) -> Result<usize> {
        self.store.invalidate(id, wait).await
    }

    /// 按模板失效
    pub async fn invalidate_template(&self, template: &str, wait: bool) -> Result<usize> {
        self.store.invalidate_by_template(template, wait).await
    }

    /// 处理一次顶层请求
    ///
    /// # 参数
    ///
    /// * `view` - 请求视图
    /// * `attrs` - 请求属性表
    /// * `sink` - 响应输出
    ///
    /// # 返回值
    ///
    /// 返回顶层节点的处理结果；只有渲染失败、异步超时和回放失败会返回错误
    #[instrument(skip_all, level = "debug", fields(uri = %view.request_uri()))]
    pub async fn handle_request(
        &self,
        view: &dyn RequestView,
        attrs: &mut AttributeMap,
        sink: &mut dyn ResponseSink,
    ) -> Result<FragmentReport> {
        let settings = self.settings();
        let esi_config = &settings.config.esi;
        let edge = if esi_config.enabled {
            EdgeCapability::negotiate(view.header(&esi_config.capability_header))
        } else {
            EdgeCapability::None
        };
        let marker = view
            .query_string()
            .and_then(|q| query_param(q, &esi_config.marker_param))
            .filter(|marker| {
                let known = self.edge_policy(&settings, marker).is_some()
                    && view.servlet_path() == *marker;
                if !known {
                    debug!(
                        "FragmentCacheEngine: ignoring marker {} on {}",
                        marker,
                        view.servlet_path()
                    );
                }
                known
            })
            .map(str::to_string);
        let scope = RequestScope::new(edge, marker);
        debug!(
            "FragmentCacheEngine: request {} edge={:?} marker={:?}",
            scope.id(),
            edge,
            scope.marker()
        );

        let mut node = self.pool.acquire();
        node.target = DispatchTarget::request(view.servlet_path());
        node.edge = edge;
        let result = self.execute(&scope, view, attrs, sink, &mut node, true).await;

        if result.is_ok() && edge.is_present() && node.has_esi_include() {
            // 页面本身不缓存时仍需告知边缘节点处理包含占位符
            let value = build_directive(
                &DirectiveParams {
                    edge_cacheable: false,
                    cacheable: false,
                    failed: false,
                    has_esi_include: true,
                    expiration: None,
                    key: None,
                    data_ids: &[],
                },
                now_millis(),
                esi_config.max_age_ceiling,
            );
            esi::emit_directive(sink, &esi_config.directive_header, &value, false);
        }

        let report = FragmentReport {
            template: node.target().path.clone(),
            key: node.info().key.clone(),
            cache_type: node.cache_type(),
            data_ids: node.info().data_ids.clone(),
            invalidation_set: node.invalidation_set(),
            has_esi_include: node.has_esi_include(),
        };
        self.pool.release(node);
        result.map(|_| report)
    }

    /// 执行单个组合节点
    fn execute<'a>(
        &'a self,
        scope: &'a RequestScope,
        view: &'a dyn RequestView,
        attrs: &'a mut AttributeMap,
        sink: &'a mut dyn ResponseSink,
        node: &'a mut FragmentComposer,
        top_level: bool,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let settings = self.settings();
            let template = node.target().path.clone();
            // 标记参数只在指向本请求路径的回源地址时保留
            let reentry = top_level && scope.marker().is_some();
            let policy = match scope.marker() {
                Some(marker) if top_level => self.edge_policy(&settings, marker),
                _ => settings.policy(&template),
            };
            let Some(policy) = policy else {
                debug!("FragmentCacheEngine: no policy for {}, rendering uncached", template);
                node.start_capture();
                return self
                    .render_uncached(&settings, scope, view, attrs, sink, node)
                    .await;
            };

            let descriptor = if reentry {
                settings.resolver.resolve_external(view, attrs, &policy)
            } else {
                settings.resolver.resolve(view, attrs, &policy)
            };
            let invalidated = settings
                .resolver
                .apply_invalidations(self.store.as_ref(), &descriptor)
                .await;
            if invalidated > 0 {
                debug!(
                    "FragmentCacheEngine: {} invalidated {} entries",
                    template, invalidated
                );
            }

            let mut info = FragmentInfo::from_descriptor(policy.clone(), &descriptor, &policy.template, now_millis());
            if info.do_not_consume && scope.edge().is_present() && (info.edge_cacheable || node.edge_ancestor) {
                // 边缘节点需要完整的依赖标识
                debug!("FragmentCacheEngine: do-not-consume of {} cancelled for edge", template);
                info.do_not_consume = false;
            }
            node.configure(info);

            if esi::should_delegate(
                &settings.config.esi,
                scope.edge(),
                node.info().edge_cacheable,
                top_level,
                scope.marker(),
                policy.edge_url(),
            ) {
                return self.delegate_to_edge(&settings, view, sink, node, &policy);
            }

            let Some(key) = node.info().key.clone() else {
                GLOBAL_METRICS.record_request(&template, "lookup", "uncacheable");
                node.start_capture();
                return self
                    .render_uncached(&settings, scope, view, attrs, sink, node)
                    .await;
            };

            let (entry, outcome) = self.lookup(&key).await;
            GLOBAL_METRICS.record_request(&template, "lookup", outcome);
            if let Some(entry) = entry {
                return self
                    .serve_hit(&settings, scope, view, attrs, sink, node, entry)
                    .await;
            }

            let guard = PinGuard::acquire(&self.store, &key).await;
            if let (Some(entry), _) = self.lookup(&key).await {
                drop(guard);
                debug!(
                    "FragmentCacheEngine: {} populated by a concurrent render",
                    key
                );
                GLOBAL_METRICS.record_request(&template, "lookup", "hit_after_wait");
                return self
                    .serve_hit(&settings, scope, view, attrs, sink, node, entry)
                    .await;
            }
            let result = self
                .render_and_populate(&settings, scope, view, attrs, sink, node, &key)
                .await;
            drop(guard);
            result
        }
        .boxed()
    }

    /// 回源地址对应的策略
    fn edge_policy(
        &self,
        settings: &EngineSettings,
        edge_url: &str,
    ) -> Option<Arc<FragmentPolicy>> {
        self.esi_registry
            .lookup(edge_url)
            .or_else(|| settings.by_edge_url.get(edge_url).cloned())
    }

    async fn lookup(&self, key: &str) -> (Option<CacheEntry>, &'static str) {
        match self.store.get(key).await {
            Ok(Some(entry)) if !entry.is_invalid() => (Some(entry), "hit"),
            Ok(Some(_)) => {
                debug!("FragmentCacheEngine: invalid entry for {}", key);
                (None, "invalid_hit")
            }
            Ok(None) => (None, "miss"),
            Err(e) => {
                warn!("FragmentCacheEngine: store lookup of {} failed: {}", key, e);
                (None, "store_error")
            }
        }
    }

    /// 回放命中的条目
    #[allow(clippy::too_many_arguments)]
    async fn serve_hit(
        &self,
        settings: &EngineSettings,
        scope: &RequestScope,
        view: &dyn RequestView,
        attrs: &mut AttributeMap,
        sink: &mut dyn ResponseSink,
        node: &mut FragmentComposer,
        entry: CacheEntry,
    ) -> Result<()> {
        debug!("FragmentCacheEngine: hit {}", entry.key);
        node.cache_type = CacheType::WasCached;
        node.info.refresh_from_entry(&entry.metadata);
        node.output_mode = entry.value.output_mode;
        node.cached = Some(entry.value.clone());
        let ids = entry_ids(&entry);
        node.value_set.extend(ids.iter().cloned());

        let mut dispatcher = EngineDispatcher {
            engine: self,
            scope,
            view,
            edge_ancestor: node.edge_ancestor || node.info.edge_cacheable,
            has_esi_include: false,
            ids: ValueSet::new(),
        };
        let replayed = replay(&entry.value, attrs, sink, &mut dispatcher).await;
        node.has_esi_include |= dispatcher.has_esi_include;
        node.value_set.extend(dispatcher.ids);
        if let Err(e) = replayed {
            GLOBAL_METRICS.record_request(&node.target().path, "replay", "error");
            warn!("FragmentCacheEngine: replay of {} failed: {}", entry.key, e);
            self.emit_directive(settings, scope, sink, node, true);
            return Err(e);
        }

        if node.info().is_externalizable() {
            let headers = external_headers(&entry.value, &*sink);
            self.externalize(view, headers, node, &entry.value, &ids).await;
        }
        self.emit_directive(settings, scope, sink, node, false);
        Ok(())
    }

    /// 渲染并在可缓存时写入存储
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, level = "debug", fields(key = %key))]
    async fn render_and_populate(
        &self,
        settings: &EngineSettings,
        scope: &RequestScope,
        view: &dyn RequestView,
        attrs: &mut AttributeMap,
        sink: &mut dyn ResponseSink,
        node: &mut FragmentComposer,
        key: &str,
    ) -> Result<()> {
        let template = node.target().path.clone();
        node.start_capture();
        let started = Instant::now();
        let rendered = self.render_node(settings, scope, view, attrs, sink, node).await;
        GLOBAL_METRICS.record_duration(&template, "render", started.elapsed().as_secs_f64());

        let marked = match rendered {
            Ok(marked) => marked,
            Err(e) => {
                node.cache_type = CacheType::NotCached;
                let result = match e {
                    FragmentError::AsyncTimeout(_) => "timeout",
                    _ => "error",
                };
                GLOBAL_METRICS.record_request(&template, "render", result);
                warn!("FragmentCacheEngine: render of {} failed: {}", template, e);
                self.emit_directive(settings, scope, sink, node, true);
                return Err(e);
            }
        };

        let status = sink.status();
        let reason = if marked {
            Some("marked uncacheable by renderer")
        } else if settings.config.global.filtered_status_codes.contains(&status) {
            Some("filtered status code")
        } else if node.info().uncacheable {
            Some("node uncacheable")
        } else {
            None
        };
        if let Some(reason) = reason {
            node.info_mut().uncacheable = true;
            GLOBAL_METRICS.record_request(&template, "populate", "uncacheable");
            debug!(
                "FragmentCacheEngine: {} not cached: {} (status {})",
                key, reason, status
            );
            self.emit_directive(settings, scope, sink, node, false);
            return Ok(());
        }

        let memento = match node.to_memento() {
            Ok(memento) => Arc::new(memento),
            Err(e) => {
                node.info_mut().uncacheable = true;
                GLOBAL_METRICS.record_request(&template, "populate", "serialization_error");
                warn!("FragmentCacheEngine: {} not cached: {}", key, e);
                self.emit_directive(settings, scope, sink, node, false);
                return Ok(());
            }
        };

        if scope.populate_once(key) {
            let metadata = node
                .info()
                .entry_metadata(memento.expiration, memento.timestamp);
            match self.store.put(key, memento.clone(), metadata).await {
                Ok(()) => {
                    node.cache_type = CacheType::Populated;
                    GLOBAL_METRICS.record_request(&template, "populate", "ok");
                    debug!(
                        "FragmentCacheEngine: populated {} ({} items, {} links)",
                        key,
                        memento.contents.len(),
                        memento.link_count()
                    );
                }
                Err(e) => {
                    GLOBAL_METRICS.record_request(&template, "populate", "store_error");
                    warn!("FragmentCacheEngine: store put of {} failed: {}", key, e);
                }
            }
            if node.cache_type() == CacheType::Populated && node.info().is_externalizable() {
                let ids = node.invalidation_set();
                let headers = external_headers(&memento, &*sink);
                self.externalize(view, headers, node, &memento, &ids).await;
            }
        }
        self.emit_directive(settings, scope, sink, node, false);
        Ok(())
    }

    /// 渲染不参与缓存的节点
    async fn render_uncached(
        &self,
        settings: &EngineSettings,
        scope: &RequestScope,
        view: &dyn RequestView,
        attrs: &mut AttributeMap,
        sink: &mut dyn ResponseSink,
        node: &mut FragmentComposer,
    ) -> Result<()> {
        if self.render_node(settings, scope, view, attrs, sink, node).await? {
            node.info_mut().uncacheable = true;
        }
        Ok(())
    }

    /// 调用渲染器，挂起时等待异步完成
    ///
    /// # 返回值
    ///
    /// 返回渲染是否显式标记了不可缓存
    async fn render_node(
        &self,
        settings: &EngineSettings,
        scope: &RequestScope,
        view: &dyn RequestView,
        attrs: &mut AttributeMap,
        sink: &mut dyn ResponseSink,
        node: &mut FragmentComposer,
    ) -> Result<bool> {
        node.attribute_start = attrs.mark();
        node.attribute_cursor = node.attribute_start;
        let limit = Duration::from_millis(settings.config.global.async_timeout_ms);

        let mut ctx = RenderContext::new(self, scope, view, &mut *attrs, &mut *sink, &mut *node);
        let mut status = self.renderer.render(&mut ctx).await;
        let outcome = loop {
            match status {
                Ok(RenderStatus::Complete) => break Ok(ctx.uncacheable),
                Ok(RenderStatus::Uncacheable) => break Ok(true),
                Ok(RenderStatus::Suspended(AsyncContinuation { signal, resume })) => {
                    ctx.node.async_pending = true;
                    debug!(
                        "FragmentCacheEngine: {} suspended, waiting up to {:?}",
                        ctx.node.target(),
                        limit
                    );
                    status = match tokio::time::timeout(limit, signal).await {
                        Ok(Ok(())) => resume.resume(&mut ctx).await,
                        Ok(Err(_)) => Err(FragmentError::Render(format!(
                            "async render of {} was abandoned",
                            ctx.node.target()
                        ))),
                        Err(_) => Err(FragmentError::AsyncTimeout(format!(
                            "{} did not complete within {:?}",
                            ctx.node.target(),
                            limit
                        ))),
                    };
                }
                Err(e) => break Err(e),
            }
        };
        ctx.node.async_pending = false;
        if ctx.redispatched {
            debug!(
                "FragmentCacheEngine: {} completed after re-entrant dispatch",
                ctx.node.target()
            );
        }
        drop(ctx);
        node.render_attributes = attrs.changes_since(node.attribute_start);
        outcome
    }

    /// 分派子片段
    pub(crate) fn dispatch_child<'a>(
        &'a self,
        scope: &'a RequestScope,
        view: &'a dyn RequestView,
        attrs: &'a mut AttributeMap,
        sink: &'a mut dyn ResponseSink,
        parent: &'a mut FragmentComposer,
        target: DispatchTarget,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut child = self.pool.acquire();
            child.target = target.clone();
            child.pre_attributes = attrs.changes_since(parent.attribute_cursor);
            let begin = attrs.mark();
            parent.begin_child(&mut child);

            let included = IncludedRequest::new(view, &target);
            let result = self
                .execute(scope, &included, attrs, sink, &mut child, false)
                .await;

            child.post_attributes = attrs.changes_since(begin);
            parent.attribute_cursor = attrs.mark();
            let tainted = child.info().uncacheable
                || (child.info().has_policy() && child.info().key.is_none() && !child.is_edge_delegated());
            if result.is_err() || (tainted && parent.will_inline(&child)) {
                debug!(
                    "FragmentCacheEngine: {} makes {} uncacheable",
                    target,
                    parent.target()
                );
                parent.info_mut().uncacheable = true;
            }
            parent.end_child(child);
            result
        }
        .boxed()
    }

    /// 以边缘包含占位符代替渲染
    fn delegate_to_edge(
        &self,
        settings: &EngineSettings,
        view: &dyn RequestView,
        sink: &mut dyn ResponseSink,
        node: &mut FragmentComposer,
        policy: &Arc<FragmentPolicy>,
    ) -> Result<()> {
        let edge_url = policy.edge_url();
        let placeholder = build_include(&settings.config.esi, edge_url, view.query_string());
        self.esi_registry.register(edge_url, policy.clone());
        match sink.write_str(&placeholder) {
            Err(FragmentError::OutputMode(_)) => sink.write_bytes(placeholder.as_bytes())?,
            other => other?,
        }
        node.has_esi_include = true;
        node.edge_delegated = true;
        node.info_mut().edge_cacheable = false;
        node.cache_type = CacheType::Populated;
        GLOBAL_METRICS.record_edge_delegation(&node.target().path);
        debug!(
            "FragmentCacheEngine: {} delegated to edge as {}",
            node.target().path,
            placeholder
        );
        Ok(())
    }

    /// 写出缓存指令
    ///
    /// 只有最外层正在记录输出的节点写出。
    fn emit_directive(
        &self,
        settings: &EngineSettings,
        scope: &RequestScope,
        sink: &mut dyn ResponseSink,
        node: &FragmentComposer,
        failed: bool,
    ) {
        let esi_config = &settings.config.esi;
        if !esi_config.enabled || !scope.edge().is_present() || node.ancestor_capturing {
            return;
        }
        let was_cached = node.cache_type() == CacheType::WasCached;
        if !(node.capturing || was_cached) {
            return;
        }
        let expiration = if was_cached {
            node.info().expiration
        } else {
            node.effective_expiration()
        };
        let params = DirectiveParams {
            edge_cacheable: node.info().edge_cacheable,
            cacheable: node.info().is_cacheable(),
            failed,
            has_esi_include: node.has_esi_include(),
            expiration,
            key: node.info().key.as_deref(),
            data_ids: &node.info().data_ids,
        };
        let value = build_directive(&params, now_millis(), esi_config.max_age_ceiling);
        if esi::emit_directive(sink, &esi_config.directive_header, &value, esi_config.force_directive) {
            debug!("FragmentCacheEngine: {}: {}", esi_config.directive_header, value);
        }
    }

    /// 推送到外部缓存
    async fn externalize(
        &self,
        view: &dyn RequestView,
        headers: Vec<(String, String)>,
        node: &FragmentComposer,
        memento: &FragmentMemento,
        ids: &ValueSet,
    ) {
        let (Some(registry), Some(name)) = (&self.external, node.info().external_cache.as_deref()) else {
            return;
        };
        let Some(group) = registry.group(name) else {
            warn!("FragmentCacheEngine: external group {} is not configured", name);
            return;
        };
        let Some(content) = memento.flatten() else {
            debug!(
                "FragmentCacheEngine: {} has dispatched children, not externalized",
                memento.template
            );
            return;
        };
        // 边缘节点按完整请求地址缓存
        let uri = match view.query_string() {
            Some(query) if !query.is_empty() => format!("{}?{}", view.request_uri(), query),
            _ => view.request_uri().to_string(),
        };
        let entry = ExternalEntry::from_headers(view.host().unwrap_or_default(), &uri, content, &headers);
        let delivered = group.publish(entry, ids).await;
        debug!(
            "FragmentCacheEngine: {} published to {} ({} deliveries)",
            uri, name, delivered
        );
    }
}

/// 推送到外部缓存的响应头
///
/// 在等待推送之前取出，推送期间不再借用响应输出。
fn external_headers(
    memento: &FragmentMemento,
    sink: &dyn ResponseSink,
) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if let Some(content_type) = memento.content_type.clone().or_else(|| sink.content_type()) {
        headers.push(("Content-Type".to_string(), content_type));
    }
    for name in EXTERNAL_HEADERS {
        if let Some(value) = sink.header(name) {
            headers.push((name.to_string(), value));
        }
    }
    headers
}

/// 存储条目的失效标识
fn entry_ids(entry: &CacheEntry) -> ValueSet {
    std::iter::once(entry.key.clone())
        .chain(entry.data_ids().iter().cloned())
        .chain(entry.templates().iter().cloned())
        .collect()
}

/// 回放命中条目时重新执行未内联的子片段
struct EngineDispatcher<'e> {
    engine: &'e FragmentCacheEngine,
    scope: &'e RequestScope,
    view: &'e dyn RequestView,
    edge_ancestor: bool,
    /// 重新分派的子片段产生了边缘包含占位符
    has_esi_include: bool,
    /// 重新分派的子片段的失效标识
    ids: ValueSet,
}

#[async_trait]
impl<'e> LinkDispatcher for EngineDispatcher<'e> {
    async fn dispatch(
        &mut self,
        target: &DispatchTarget,
        attrs: &mut AttributeMap,
        sink: &mut dyn ResponseSink,
    ) -> Result<()> {
        let mut child = self.engine.pool.acquire();
        child.target = target.clone();
        child.edge = self.scope.edge();
        child.edge_ancestor = self.edge_ancestor;
        // 缓存指令由回放的节点写出
        child.ancestor_capturing = true;
        let included = IncludedRequest::new(self.view, target);
        let result = self
            .engine
            .execute(self.scope, &included, attrs, sink, &mut child, false)
            .await;
        self.has_esi_include |= child.has_esi_include();
        self.ids.extend(child.invalidation_set());
        self.engine.pool.release(child);
        result
    }
}
