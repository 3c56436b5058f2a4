//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了边缘缓存（ESI）委托、缓存指令和边缘回源的集成测试。

#[path = "../common/mod.rs"]
mod common;

use common::{build_engine, config_with, serve, setup_logging, ScriptedRenderer, Step};
use oxfrag::config::{ComponentConfig, ComponentKind};
use oxfrag::http::ResponseSink;
use oxfrag::{CacheType, Config, FragmentPolicy, FragmentRequest};
use std::sync::Arc;

const CAPABILITY: &str = "Surrogate-Capability";
const DIRECTIVE: &str = "Surrogate-Control";

fn renderer() -> Arc<ScriptedRenderer> {
    Arc::new(
        ScriptedRenderer::new()
            .page(
                "/page",
                vec![Step::Text("<page>"), Step::Include("/nav"), Step::Text("</page>")],
            )
            .page("/nav", vec![Step::Text("<nav>")])
            .page("/edge/nav", vec![Step::Text("<edge-nav>")]),
    )
}

fn nav_policy() -> FragmentPolicy {
    let mut nav = FragmentPolicy::new("nav", "/nav");
    nav.edge_cacheable = true;
    nav
}

fn edge_request(uri: &str) -> FragmentRequest {
    FragmentRequest::get(uri).header(CAPABILITY, "edge=\"ESI/1.0\"")
}

/// 测试边缘节点支持 include 时子片段以占位符代替
#[tokio::test]
async fn test_edge_cacheable_child_is_delegated() {
    setup_logging();
    let renderer = renderer();
    let (engine, _store) = build_engine(config_with(vec![nav_policy()]), renderer.clone());

    let (response, report) = serve(&engine, &edge_request("/page")).await;
    let report = report.unwrap();

    assert_eq!(
        response.body_string(),
        "<page><esi:include src=\"/nav?_esiurl=/nav\"/></page>"
    );
    assert!(report.has_esi_include);
    assert_eq!(renderer.count("/nav"), 0);
    assert_eq!(
        response.header(DIRECTIVE).as_deref(),
        Some("no-store,content=\"ESI/1.0\"")
    );
    assert!(engine.esi_registry().lookup("/nav").is_some());
}

/// 测试没有边缘能力时子片段正常渲染
#[tokio::test]
async fn test_without_capability_renders_inline() {
    setup_logging();
    let renderer = renderer();
    let (engine, _store) = build_engine(config_with(vec![nav_policy()]), renderer.clone());

    let (response, report) = serve(&engine, &FragmentRequest::get("/page")).await;

    assert_eq!(response.body_string(), "<page><nav></page>");
    assert!(!report.unwrap().has_esi_include);
    assert_eq!(renderer.count("/nav"), 1);
    assert_eq!(response.header(DIRECTIVE), None);
}

/// 测试边缘节点只支持旧版本时不委托
#[tokio::test]
async fn test_old_esi_version_is_not_delegated() {
    setup_logging();
    let renderer = renderer();
    let (engine, _store) = build_engine(config_with(vec![nav_policy()]), renderer.clone());
    let request = FragmentRequest::get("/page").header(CAPABILITY, "edge=\"ESI/0.9\"");

    let (response, _) = serve(&engine, &request).await;

    assert_eq!(response.body_string(), "<page><nav></page>");
    assert_eq!(renderer.count("/nav"), 1);
}

/// 测试关闭 ESI 后忽略边缘能力声明
#[tokio::test]
async fn test_disabled_esi_ignores_capability() {
    setup_logging();
    let renderer = renderer();
    let mut config = config_with(vec![nav_policy()]);
    config.esi.enabled = false;
    let (engine, _store) = build_engine(config, renderer.clone());

    let (response, report) = serve(&engine, &edge_request("/page")).await;

    assert_eq!(response.body_string(), "<page><nav></page>");
    assert!(!report.unwrap().has_esi_include);
    assert_eq!(response.header(DIRECTIVE), None);
}

/// 测试边缘回源请求渲染片段并写出可缓存指令
#[tokio::test]
async fn test_edge_fetch_renders_and_caches_fragment() {
    setup_logging();
    let renderer = renderer();
    let (engine, store) = build_engine(config_with(vec![nav_policy()]), renderer.clone());

    serve(&engine, &edge_request("/page")).await.1.unwrap();
    let fetch = edge_request("/nav?_esiurl=/nav");
    let (response, report) = serve(&engine, &fetch).await;
    let report = report.unwrap();

    assert_eq!(response.body_string(), "<nav>");
    assert_eq!(report.key.as_deref(), Some("/nav?_esiurl=/nav"));
    assert_eq!(report.cache_type, CacheType::Populated);
    assert!(store.contains("/nav?_esiurl=/nav"));
    let directive = response.header(DIRECTIVE).unwrap();
    assert!(directive.starts_with("max-age="));
    assert!(directive.contains("depid=\"/nav?_esiurl=/nav\""));

    let (again, report) = serve(&engine, &fetch).await;
    assert_eq!(report.unwrap().cache_type, CacheType::WasCached);
    assert_eq!(again.body_string(), "<nav>");
    assert!(again.header(DIRECTIVE).unwrap().starts_with("max-age="));
    assert_eq!(renderer.count("/nav"), 1);
}

/// 测试替代地址用于占位符和回源
#[tokio::test]
async fn test_alternate_url_is_used_for_edge_fetch() {
    setup_logging();
    let renderer = renderer();
    let mut nav = nav_policy();
    nav.alternate_url = Some("/edge/nav".to_string());
    let (engine, _store) = build_engine(config_with(vec![nav]), renderer.clone());

    let (page, _) = serve(&engine, &edge_request("/page")).await;
    assert!(page
        .body_string()
        .contains("<esi:include src=\"/edge/nav?_esiurl=/edge/nav\"/>"));

    let (fragment, report) = serve(&engine, &edge_request("/edge/nav?_esiurl=/edge/nav")).await;
    assert_eq!(fragment.body_string(), "<edge-nav>");
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);
}

/// 测试缓存的父片段回放时重新生成占位符
#[tokio::test]
async fn test_cached_parent_replays_placeholder() {
    setup_logging();
    let renderer = renderer();
    let mut page = FragmentPolicy::new("page", "/page");
    page.consume_subfragments = true;
    let (engine, _store) = build_engine(config_with(vec![page, nav_policy()]), renderer.clone());

    let (first, report) = serve(&engine, &edge_request("/page")).await;
    assert_eq!(report.unwrap().cache_type, CacheType::Populated);
    let (second, report) = serve(&engine, &edge_request("/page")).await;
    let report = report.unwrap();

    assert_eq!(report.cache_type, CacheType::WasCached);
    assert!(report.has_esi_include);
    assert_eq!(second.body_string(), first.body_string());
    assert_eq!(
        second.header(DIRECTIVE).as_deref(),
        Some("no-store,content=\"ESI/1.0\"")
    );
    assert_eq!(renderer.count("/page"), 1);
    assert_eq!(renderer.count("/nav"), 0);
}

/// 测试重新加载策略后清空边缘地址注册表
#[tokio::test]
async fn test_reload_clears_edge_registry() {
    setup_logging();
    let renderer = renderer();
    let (engine, _store) = build_engine(config_with(vec![nav_policy()]), renderer.clone());

    serve(&engine, &edge_request("/page")).await.1.unwrap();
    assert_eq!(engine.esi_registry().len(), 1);

    engine.reload_policies(Config::default()).unwrap();
    assert!(engine.esi_registry().is_empty());
    let (response, _) = serve(&engine, &edge_request("/page")).await;
    assert_eq!(response.body_string(), "<page><nav></page>");
}

fn lang_policy(name: &str, template: &str) -> FragmentPolicy {
    let mut policy = FragmentPolicy::new(name, template);
    policy.components = vec![ComponentConfig::new(ComponentKind::Parameter, "lang").required()];
    policy
}

/// 测试标记参数不指向本请求路径时按普通请求处理
#[tokio::test]
async fn test_unknown_or_foreign_marker_is_not_reentry() {
    setup_logging();
    let renderer = Arc::new(
        ScriptedRenderer::new()
            .page("/greet", vec![Step::Text("GREET")])
            .page("/bye", vec![Step::Text("BYE")]),
    );
    let policies = vec![lang_policy("greet", "/greet"), lang_policy("bye", "/bye")];
    let (engine, _store) = build_engine(config_with(policies), renderer.clone());

    let (greet, report) =
        serve(&engine, &FragmentRequest::get("/greet?lang=en&_esiurl=zz")).await;
    assert_eq!(greet.body_string(), "GREET");
    assert_eq!(report.unwrap().key.as_deref(), Some("greet:lang=en:requestType=GET"));

    let (bye, report) = serve(&engine, &FragmentRequest::get("/bye?lang=en&_esiurl=zz")).await;
    let report = report.unwrap();
    assert_eq!(bye.body_string(), "BYE");
    assert_eq!(report.key.as_deref(), Some("bye:lang=en:requestType=GET"));
    assert_eq!(report.cache_type, CacheType::Populated);

    // 标记指向其他片段的回源地址
    let (bye, report) =
        serve(&engine, &FragmentRequest::get("/bye?lang=fr&_esiurl=/greet")).await;
    assert_eq!(bye.body_string(), "BYE");
    assert_eq!(report.unwrap().key.as_deref(), Some("bye:lang=fr:requestType=GET"));
    let (greet, report) =
        serve(&engine, &FragmentRequest::get("/greet?lang=fr&_esiurl=/greet")).await;
    assert_eq!(greet.body_string(), "GREET");
    assert_eq!(report.unwrap().key.as_deref(), Some("/greet?lang=fr&_esiurl=/greet"));
    assert_eq!(renderer.count("/bye"), 2);
    assert_eq!(renderer.count("/greet"), 2);
}

fn consuming_page_with_product() -> (Arc<ScriptedRenderer>, Config) {
    let renderer = Arc::new(
        ScriptedRenderer::new()
            .page(
                "/page",
                vec![Step::Text("<page>"), Step::IncludeWith("/product", "id=7")],
            )
            .page("/product", vec![Step::Param("id")]),
    );
    let mut page = FragmentPolicy::new("page", "/page");
    page.edge_cacheable = true;
    page.consume_subfragments = true;
    let mut id = ComponentConfig::new(ComponentKind::Parameter, "id").required();
    id.data_id = Some("prod".to_string());
    let mut product = FragmentPolicy::new("product", "/product");
    product.components = vec![id];
    product.do_not_consume = true;
    (renderer, config_with(vec![page, product]))
}

/// 测试边缘节点存在时不消费标记被取消，子片段标识进入依赖
#[tokio::test]
async fn test_do_not_consume_cancelled_for_edge() {
    setup_logging();
    let (renderer, config) = consuming_page_with_product();
    let (engine, _store) = build_engine(config, renderer.clone());

    let (response, report) = serve(&engine, &edge_request("/page")).await;
    let report = report.unwrap();

    assert_eq!(response.body_string(), "<page>7");
    assert_eq!(report.data_ids, vec!["prod=7".to_string()]);
    let directive = response.header(DIRECTIVE).unwrap();
    assert!(directive.starts_with("max-age="));
    assert!(directive.contains("depid=\"page:requestType=GET\""));
    assert!(directive.contains("depid=\"prod=7\""));
}

/// 测试没有边缘能力时不消费的子片段标识不进入父片段
#[tokio::test]
async fn test_do_not_consume_kept_without_edge() {
    setup_logging();
    let (renderer, config) = consuming_page_with_product();
    let (engine, _store) = build_engine(config, renderer.clone());

    let (response, report) = serve(&engine, &FragmentRequest::get("/page")).await;
    let report = report.unwrap();

    assert_eq!(response.body_string(), "<page>7");
    assert!(report.data_ids.is_empty());
    assert_eq!(response.header(DIRECTIVE), None);
}
