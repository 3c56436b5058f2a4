//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存键失效、次级标识失效和模板失效的集成测试。

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{build_engine, config_with, serve, setup_logging, ScriptedRenderer, Step};
use oxfrag::config::{ComponentConfig, ComponentKind};
use oxfrag::store::InvalidationListener;
use oxfrag::{CacheType, FragmentPolicy, FragmentRequest, FragmentStore};
use std::sync::{Arc, Mutex};

fn greet_policy() -> FragmentPolicy {
    let mut policy = FragmentPolicy::new("greet", "/greet");
    policy.components = vec![ComponentConfig::new(ComponentKind::Parameter, "lang").required()];
    policy
}

fn product_policy() -> FragmentPolicy {
    let mut id = ComponentConfig::new(ComponentKind::Parameter, "id").required();
    id.data_id = Some("product".to_string());
    let mut policy = FragmentPolicy::new("product", "/product");
    policy.components = vec![id];
    policy
}

#[derive(Default)]
struct RecordingListener {
    seen: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl InvalidationListener for RecordingListener {
    async fn on_invalidate(&self, ids: &[String]) {
        self.seen.lock().unwrap().push(ids.to_vec());
    }
}

/// 测试不同语言的缓存键相互独立
#[tokio::test]
async fn test_greet_keys_invalidate_independently() {
    setup_logging();
    let renderer = Arc::new(ScriptedRenderer::new().page("/greet", vec![Step::Param("lang")]));
    let (engine, store) = build_engine(config_with(vec![greet_policy()]), renderer.clone());

    let (_, en) = serve(&engine, &FragmentRequest::get("/greet?lang=en")).await;
    let (_, fr) = serve(&engine, &FragmentRequest::get("/greet?lang=fr")).await;
    let (missing, none) = serve(&engine, &FragmentRequest::get("/greet")).await;

    assert_eq!(en.unwrap().key.as_deref(), Some("greet:lang=en:requestType=GET"));
    assert_eq!(fr.unwrap().key.as_deref(), Some("greet:lang=fr:requestType=GET"));
    let none = none.unwrap();
    assert_eq!(none.key, None);
    assert_eq!(none.cache_type, CacheType::NotCached);
    assert_eq!(missing.body_string(), "");

    let removed = engine
        .invalidate("greet:lang=en:requestType=GET", true)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(!store.contains("greet:lang=en:requestType=GET"));
    assert!(store.contains("greet:lang=fr:requestType=GET"));

    let (_, fr_again) = serve(&engine, &FragmentRequest::get("/greet?lang=fr")).await;
    assert_eq!(fr_again.unwrap().cache_type, CacheType::WasCached);
    let (_, en_again) = serve(&engine, &FragmentRequest::get("/greet?lang=en")).await;
    assert_eq!(en_again.unwrap().cache_type, CacheType::Populated);
    assert_eq!(renderer.count("/greet"), 4);
}

/// 测试按次级标识失效
#[tokio::test]
async fn test_data_id_invalidation() {
    setup_logging();
    let renderer = Arc::new(ScriptedRenderer::new().page("/product", vec![Step::Counter]));
    let (engine, store) = build_engine(config_with(vec![product_policy()]), renderer.clone());

    let (_, report) = serve(&engine, &FragmentRequest::get("/product?id=42")).await;
    let report = report.unwrap();
    assert_eq!(report.data_ids, vec!["product=42".to_string()]);
    serve(&engine, &FragmentRequest::get("/product?id=7")).await.1.unwrap();
    assert_eq!(store.keys_for_id("product=42").len(), 1);

    assert_eq!(engine.invalidate("product=42", true).await.unwrap(), 1);

    let (body, report) = serve(&engine, &FragmentRequest::get("/product?id=42")).await;
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);
    assert_eq!(body.body_string(), "#3");
    let (_, report) = serve(&engine, &FragmentRequest::get("/product?id=7")).await;
    assert_eq!(report.unwrap().cache_type, CacheType::WasCached);
}

/// 测试标记失效的条目被视为未命中
#[tokio::test]
async fn test_soft_invalidation_forces_rerender() {
    setup_logging();
    let renderer = Arc::new(ScriptedRenderer::new().page("/product", vec![Step::Counter]));
    let (engine, store) = build_engine(config_with(vec![product_policy()]), renderer.clone());
    let request = FragmentRequest::get("/product?id=1");

    serve(&engine, &request).await.1.unwrap();
    engine.invalidate("product=1", false).await.unwrap();
    // 条目仍在存储中，但已失效
    let entry = store.get("product:id=1:requestType=GET").await.unwrap().unwrap();
    assert!(entry.is_invalid());

    let (response, report) = serve(&engine, &request).await;
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);
    assert_eq!(response.body_string(), "#2");
}

/// 测试被内联子片段的标识也能失效父片段
#[tokio::test]
async fn test_consumed_child_ids_invalidate_parent() {
    setup_logging();
    let renderer = Arc::new(
        ScriptedRenderer::new()
            .page(
                "/page",
                vec![Step::Counter, Step::IncludeWith("/product", "id=5")],
            )
            .page("/product", vec![Step::Text("|p")]),
    );
    let mut page = FragmentPolicy::new("page", "/page");
    page.consume_subfragments = true;
    let (engine, store) = build_engine(
        config_with(vec![page, product_policy()]),
        renderer.clone(),
    );
    let request = FragmentRequest::get("/page");

    let (first, report) = serve(&engine, &request).await;
    let report = report.unwrap();
    assert_eq!(first.body_string(), "#1|p");
    assert!(report.data_ids.contains(&"product=5".to_string()));
    assert!(report.invalidation_set.contains("product:id=5:requestType=GET"));
    assert_eq!(store.keys_for_id("product=5").len(), 2);

    engine.invalidate("product=5", true).await.unwrap();

    let (second, report) = serve(&engine, &request).await;
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);
    assert_eq!(second.body_string(), "#2|p");
}

/// 测试按模板失效
#[tokio::test]
async fn test_template_invalidation() {
    setup_logging();
    let renderer = Arc::new(ScriptedRenderer::new().page("/greet", vec![Step::Param("lang")]));
    let (engine, store) = build_engine(config_with(vec![greet_policy()]), renderer.clone());

    for lang in ["en", "fr", "de"] {
        serve(&engine, &FragmentRequest::get(&format!("/greet?lang={}", lang)))
            .await
            .1
            .unwrap();
    }
    assert_eq!(engine.invalidate_template("/greet", true).await.unwrap(), 3);
    assert!(!store.contains("greet:lang=de:requestType=GET"));
}

/// 测试带失效组件的请求先失效依赖再渲染，且自身不缓存
#[tokio::test]
async fn test_invalidate_component_purges_before_render() {
    setup_logging();
    let renderer = Arc::new(
        ScriptedRenderer::new()
            .page("/product", vec![Step::Counter])
            .page("/purge", vec![Step::Text("ok")]),
    );
    let mut purge = ComponentConfig::new(ComponentKind::Parameter, "id");
    purge.invalidate = Some("product".to_string());
    let mut purge_policy = FragmentPolicy::new("purge", "/purge");
    purge_policy.components = vec![purge];
    let (engine, store) = build_engine(
        config_with(vec![product_policy(), purge_policy]),
        renderer.clone(),
    );

    serve(&engine, &FragmentRequest::get("/product?id=9")).await.1.unwrap();
    let (response, report) = serve(&engine, &FragmentRequest::get("/purge?id=9")).await;
    assert_eq!(response.body_string(), "ok");
    assert_eq!(report.unwrap().key, None);
    let entry = store.get("product:id=9:requestType=GET").await.unwrap();
    assert!(entry.map_or(true, |e| e.is_invalid()));
}

/// 测试失效通知监听器
#[tokio::test]
async fn test_listener_receives_invalidated_ids() {
    setup_logging();
    let renderer = Arc::new(ScriptedRenderer::new().page("/product", vec![Step::Counter]));
    let (engine, store) = build_engine(config_with(vec![product_policy()]), renderer.clone());
    let listener = Arc::new(RecordingListener::default());
    store.add_listener(listener.clone());

    serve(&engine, &FragmentRequest::get("/product?id=3")).await.1.unwrap();
    engine.invalidate("product=3", true).await.unwrap();

    let seen = listener.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0],
        vec![
            "product=3".to_string(),
            "product:id=3:requestType=GET".to_string()
        ]
    );
}
