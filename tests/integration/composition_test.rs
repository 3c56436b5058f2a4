//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段组合与回放的集成测试。

#[path = "../common/mod.rs"]
mod common;

use common::{build_engine, config_with, serve, setup_logging, ScriptedRenderer, Step};
use oxfrag::config::{ComponentConfig, ComponentKind};
use oxfrag::http::ResponseSink;
use oxfrag::{CacheType, FragmentError, FragmentPolicy, FragmentRequest};
use std::sync::Arc;

fn consuming(name: &str, template: &str) -> FragmentPolicy {
    let mut policy = FragmentPolicy::new(name, template);
    policy.consume_subfragments = true;
    policy
}

fn page_renderer() -> ScriptedRenderer {
    ScriptedRenderer::new()
        .page(
            "/page",
            vec![
                Step::Text("<page>"),
                Step::Include("/nav"),
                Step::Include("/footer"),
                Step::Text("</page>"),
            ],
        )
        .page(
            "/nav",
            vec![
                Step::Header("X-Nav", "1"),
                Step::Cookie("visited", "yes"),
                Step::Text("<nav>"),
            ],
        )
        .page("/footer", vec![Step::Text("<footer>")])
}

/// 测试内联子片段后的回放与首次渲染输出一致
#[tokio::test]
async fn test_consumed_page_replays_identically() {
    setup_logging();
    let renderer = Arc::new(page_renderer());
    let config = config_with(vec![
        consuming("page", "/page"),
        FragmentPolicy::new("nav", "/nav"),
    ]);
    let (engine, store) = build_engine(config, renderer.clone());
    let request = FragmentRequest::get("/page");

    let (first, report) = serve(&engine, &request).await;
    let report = report.unwrap();
    assert_eq!(report.cache_type, CacheType::Populated);
    assert_eq!(first.body_string(), "<page><nav><footer></page>");
    let key = report.key.clone().unwrap();
    assert!(store.contains(&key));

    let (second, report) = serve(&engine, &request).await;
    let report = report.unwrap();
    assert_eq!(report.cache_type, CacheType::WasCached);
    assert_eq!(second.body_string(), first.body_string());
    assert_eq!(second.header("X-Nav").as_deref(), Some("1"));
    assert_eq!(second.cookies().len(), 1);
    assert_eq!(second.cookies()[0].name, "visited");

    // 内联后的子片段不再单独渲染
    assert_eq!(renderer.count("/page"), 1);
    assert_eq!(renderer.count("/nav"), 1);
    assert_eq!(renderer.count("/footer"), 1);
}

/// 测试回放多次结果不变
#[tokio::test]
async fn test_replay_is_idempotent() {
    setup_logging();
    let renderer = Arc::new(page_renderer());
    let config = config_with(vec![consuming("page", "/page")]);
    let (engine, _store) = build_engine(config, renderer.clone());
    let request = FragmentRequest::get("/page");

    let (first, _) = serve(&engine, &request).await;
    for _ in 0..3 {
        let (again, report) = serve(&engine, &request).await;
        assert_eq!(report.unwrap().cache_type, CacheType::WasCached);
        assert_eq!(again.body(), first.body());
        assert_eq!(again.headers(), first.headers());
    }
    assert_eq!(renderer.total(), 3);
}

/// 测试标记为不被内联的子片段在回放时重新分派
#[tokio::test]
async fn test_do_not_consume_child_is_dispatched_on_replay() {
    setup_logging();
    let renderer = Arc::new(
        ScriptedRenderer::new()
            .page(
                "/page",
                vec![Step::Text("["), Step::Include("/ad"), Step::Text("]")],
            )
            .page("/ad", vec![Step::Counter]),
    );
    let mut ad = FragmentPolicy::new("ad", "/ad");
    ad.do_not_consume = true;
    // 必需的参数缺失，子片段没有缓存键
    ad.components = vec![ComponentConfig::new(ComponentKind::Parameter, "slot").required()];
    let config = config_with(vec![consuming("page", "/page"), ad]);
    let (engine, _store) = build_engine(config, renderer.clone());
    let request = FragmentRequest::get("/page");

    let (first, report) = serve(&engine, &request).await;
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);
    assert_eq!(first.body_string(), "[#1]");

    let (second, report) = serve(&engine, &request).await;
    assert_eq!(report.unwrap().cache_type, CacheType::WasCached);
    assert_eq!(second.body_string(), "[#2]");
    assert_eq!(renderer.count("/page"), 1);
    assert_eq!(renderer.count("/ad"), 2);
}

/// 测试被内联的子片段没有缓存键时父片段不缓存
#[tokio::test]
async fn test_keyless_consumed_child_taints_parent() {
    setup_logging();
    let renderer = Arc::new(
        ScriptedRenderer::new()
            .page("/page", vec![Step::Include("/ad")])
            .page("/ad", vec![Step::Counter]),
    );
    let mut ad = FragmentPolicy::new("ad", "/ad");
    ad.components = vec![ComponentConfig::new(ComponentKind::Parameter, "slot").required()];
    let config = config_with(vec![consuming("page", "/page"), ad]);
    let (engine, store) = build_engine(config, renderer.clone());
    let request = FragmentRequest::get("/page");

    let (_, report) = serve(&engine, &request).await;
    let report = report.unwrap();
    assert_ne!(report.cache_type, CacheType::Populated);
    assert!(!store.contains(report.key.as_deref().unwrap()));

    let (second, _) = serve(&engine, &request).await;
    assert_eq!(second.body_string(), "#2");
    assert_eq!(renderer.count("/page"), 2);
}

/// 测试过滤状态码的渲染结果不写入存储
#[tokio::test]
async fn test_filtered_status_is_not_cached() {
    setup_logging();
    let renderer = Arc::new(
        ScriptedRenderer::new().page("/error", vec![Step::Status(503), Step::Text("down")]),
    );
    let config = config_with(vec![FragmentPolicy::new("error", "/error")]);
    let (engine, _store) = build_engine(config, renderer.clone());
    let request = FragmentRequest::get("/error");

    for _ in 0..2 {
        let (response, report) = serve(&engine, &request).await;
        assert_eq!(response.status(), 503);
        assert_eq!(report.unwrap().cache_type, CacheType::NotCached);
    }
    assert_eq!(renderer.count("/error"), 2);
}

/// 测试渲染器声明不可缓存
#[tokio::test]
async fn test_renderer_marked_uncacheable() {
    setup_logging();
    let renderer = Arc::new(
        ScriptedRenderer::new().page("/volatile", vec![Step::Counter, Step::Uncacheable]),
    );
    let config = config_with(vec![FragmentPolicy::new("volatile", "/volatile")]);
    let (engine, _store) = build_engine(config, renderer.clone());
    let request = FragmentRequest::get("/volatile");

    let (first, _) = serve(&engine, &request).await;
    let (second, _) = serve(&engine, &request).await;
    assert_eq!(first.body_string(), "#1");
    assert_eq!(second.body_string(), "#2");
}

/// 测试子片段渲染失败时错误返回给调用方且不写入存储
#[tokio::test]
async fn test_child_failure_propagates() {
    setup_logging();
    let renderer = Arc::new(
        ScriptedRenderer::new()
            .page("/page", vec![Step::Text("a"), Step::Include("/broken")])
            .page("/broken", vec![Step::Fail]),
    );
    let config = config_with(vec![consuming("page", "/page")]);
    let (engine, _store) = build_engine(config, renderer.clone());
    let request = FragmentRequest::get("/page");

    let (_, report) = serve(&engine, &request).await;
    assert!(matches!(report, Err(FragmentError::Render(_))));
    let (_, report) = serve(&engine, &request).await;
    assert!(report.is_err());
    assert_eq!(renderer.count("/page"), 2);
}

/// 测试请求参数进入缓存键
#[tokio::test]
async fn test_parameter_component_separates_keys() {
    setup_logging();
    let renderer = Arc::new(ScriptedRenderer::new().page("/item", vec![Step::Param("id")]));
    let mut item = FragmentPolicy::new("item", "/item");
    item.components = vec![ComponentConfig::new(ComponentKind::Parameter, "id").required()];
    let (engine, _store) = build_engine(config_with(vec![item]), renderer.clone());

    let (one, r1) = serve(&engine, &FragmentRequest::get("/item?id=1")).await;
    let (two, r2) = serve(&engine, &FragmentRequest::get("/item?id=2")).await;
    let (one_again, r3) = serve(&engine, &FragmentRequest::get("/item?id=1")).await;

    assert_eq!(one.body_string(), "1");
    assert_eq!(two.body_string(), "2");
    assert_eq!(one_again.body_string(), "1");
    assert_ne!(r1.unwrap().key, r2.unwrap().key);
    assert_eq!(r3.unwrap().cache_type, CacheType::WasCached);
    assert_eq!(renderer.count("/item"), 2);
}

fn gate_renderer() -> ScriptedRenderer {
    ScriptedRenderer::new()
        .page(
            "/gate",
            vec![
                Step::Header("X-Gate", "1"),
                Step::Text("before|"),
                Step::Include("/footer"),
                Step::Forward("/login"),
                Step::Text("|after"),
                Step::Header("X-After", "1"),
            ],
        )
        .page("/footer", vec![Step::Text("<footer>")])
        .page("/login", vec![Step::Text("login"), Step::Counter])
}

/// 测试转发丢弃之前和之后的输出，命中时回放结果相同
#[tokio::test]
async fn test_forward_discards_parent_output() {
    setup_logging();
    let renderer = Arc::new(gate_renderer());
    let (engine, _store) = build_engine(config_with(vec![consuming("gate", "/gate")]), renderer.clone());
    let request = FragmentRequest::get("/gate");

    let (first, report) = serve(&engine, &request).await;
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);
    assert_eq!(first.body_string(), "login#1");
    assert_eq!(first.header("X-Gate").as_deref(), Some("1"));
    assert_eq!(first.header("X-After"), None);

    let (second, report) = serve(&engine, &request).await;
    assert_eq!(report.unwrap().cache_type, CacheType::WasCached);
    assert_eq!(second.body_string(), "login#1");
    assert_eq!(second.header("X-Gate").as_deref(), Some("1"));
    assert_eq!(second.header("X-After"), None);

    // 被丢弃的子片段不会在回放时重新执行
    assert_eq!(renderer.count("/gate"), 1);
    assert_eq!(renderer.count("/footer"), 1);
    assert_eq!(renderer.count("/login"), 1);
}

/// 测试未内联的转发目标在命中时重新分派，且仍然替换页面输出
#[tokio::test]
async fn test_dispatched_forward_target_replaces_output_on_hit() {
    setup_logging();
    let renderer = Arc::new(gate_renderer());
    let mut login = FragmentPolicy::new("login", "/login");
    login.do_not_consume = true;
    // 缺少必需参数时不缓存，每次都重新渲染
    login.components = vec![ComponentConfig::new(ComponentKind::Parameter, "user").required()];
    let (engine, _store) = build_engine(
        config_with(vec![consuming("gate", "/gate"), login]),
        renderer.clone(),
    );
    let request = FragmentRequest::get("/gate");

    let (first, _) = serve(&engine, &request).await;
    assert_eq!(first.body_string(), "login#1");

    let (second, report) = serve(&engine, &request).await;
    assert_eq!(report.unwrap().cache_type, CacheType::WasCached);
    assert_eq!(second.body_string(), "login#2");
    assert_eq!(renderer.count("/gate"), 1);
    assert_eq!(renderer.count("/login"), 2);
}

/// 测试响应提交后转发失败且不缓存
#[tokio::test]
async fn test_forward_after_commit_fails() {
    setup_logging();
    let renderer = Arc::new(gate_renderer());
    let (engine, store) = build_engine(config_with(vec![consuming("gate", "/gate")]), renderer.clone());
    let mut attrs = oxfrag::AttributeMap::new();
    let mut response = oxfrag::MemoryResponse::with_buffer_size(4);

    let report = engine
        .handle_request(&FragmentRequest::get("/gate"), &mut attrs, &mut response)
        .await;

    assert!(matches!(report, Err(FragmentError::Render(_))));
    assert!(!store.contains("gate:requestType=GET"));
    assert_eq!(renderer.count("/login"), 0);
}
