//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了外部边缘缓存同步的集成测试。

#[path = "../common/mod.rs"]
mod common;

use common::{build_engine, config_with, serve, setup_logging, ScriptedRenderer, Step};
use oxfrag::config::{ComponentConfig, ComponentKind, ExternalGroupConfig};
use oxfrag::external::protocol::{encode, read_message, Message};
use oxfrag::external::ExternalCacheListener;
use oxfrag::{Config, FragmentPolicy, FragmentRequest};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const GROUP: &str = "edge-a";

/// 总是写失败的连接
struct BrokenPipe;

impl AsyncWrite for BrokenPipe {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn external_config() -> Config {
    let mut id = ComponentConfig::new(ComponentKind::Parameter, "id").required();
    id.data_id = Some("product".to_string());
    let mut product = FragmentPolicy::new("product", "/product");
    product.components = vec![id];
    product.external_cache = Some(GROUP.to_string());

    let mut page = FragmentPolicy::new("page", "/page");
    page.external_cache = Some(GROUP.to_string());

    let mut ad = FragmentPolicy::new("ad", "/ad");
    ad.do_not_consume = true;

    let mut config = config_with(vec![product, page, ad]);
    config.external.groups = vec![ExternalGroupConfig {
        name: GROUP.to_string(),
        listen: None,
    }];
    config
}

fn renderer() -> Arc<ScriptedRenderer> {
    Arc::new(
        ScriptedRenderer::new()
            .page(
                "/product",
                vec![Step::Header("ETag", "\"v1\""), Step::Text("product "), Step::Param("id")],
            )
            .page("/page", vec![Step::Text("page "), Step::Include("/ad")])
            .page("/ad", vec![Step::Counter]),
    )
}

fn product_request(id: &str) -> FragmentRequest {
    FragmentRequest::get(&format!("/product?id={}", id)).header("Host", "shop.example")
}

/// 测试写入存储的片段推送给边缘节点，失效时发送移除消息
#[tokio::test]
async fn test_populate_publishes_and_invalidation_removes() {
    setup_logging();
    let (engine, _store) = build_engine(external_config(), renderer());
    let group = engine.external().unwrap().group(GROUP).unwrap();
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    group.adapter().connect("edge-1", client);

    serve(&engine, &product_request("1")).await.1.unwrap();
    let Some(Message::Add(entry)) = read_message(&mut server).await.unwrap() else {
        panic!("expected an ADD message");
    };
    assert_eq!(entry.vhost, "shop.example");
    assert_eq!(entry.uri, "/product?id=1");
    assert_eq!(entry.content, b"product 1".to_vec());
    assert_eq!(entry.etag, "\"v1\"");
    assert_eq!(group.uris_for("product=1"), vec!["/product?id=1".to_string()]);

    engine.invalidate("product=1", true).await.unwrap();
    let message = read_message(&mut server).await.unwrap();
    assert_eq!(
        message,
        Some(Message::Remove {
            vhost: "shop.example".to_string(),
            uri: "/product?id=1".to_string(),
        })
    );
    assert!(group.uris_for("product=1").is_empty());
}

/// 测试在多线程运行时的独立任务中写入并推送
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_from_spawned_task() {
    setup_logging();
    let (engine, _store) = build_engine(external_config(), renderer());
    let group = engine.external().unwrap().group(GROUP).unwrap();
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    group.adapter().connect("edge-1", client);

    let task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let (response, report) = serve(&engine, &product_request("5")).await;
            report.map(|_| response.body_string())
        })
    };
    assert_eq!(task.await.unwrap().unwrap(), "product 5");

    let Some(Message::Add(entry)) = read_message(&mut server).await.unwrap() else {
        panic!("expected an ADD message");
    };
    assert_eq!(entry.uri, "/product?id=5");
    assert_eq!(entry.etag, "\"v1\"");
}

/// 测试写失败的连接被移除，其余连接照常收到消息
#[tokio::test]
async fn test_failed_connection_is_isolated() {
    setup_logging();
    let (engine, _store) = build_engine(external_config(), renderer());
    let adapter = engine.external().unwrap().group(GROUP).unwrap().adapter().clone();
    let (good, mut server) = tokio::io::duplex(64 * 1024);
    adapter.connect("edge-good", good);
    adapter.connect("edge-broken", BrokenPipe);
    assert_eq!(adapter.len(), 2);

    serve(&engine, &product_request("2")).await.1.unwrap();

    assert!(matches!(
        read_message(&mut server).await.unwrap(),
        Some(Message::Add(_))
    ));
    assert_eq!(adapter.len(), 1);
    assert_eq!(adapter.snapshot()[0].peer(), "edge-good");
}

/// 测试含有重新分派子片段的页面不推送
#[tokio::test]
async fn test_page_with_dispatched_child_is_not_published() {
    setup_logging();
    let (engine, _store) = build_engine(external_config(), renderer());
    let group = engine.external().unwrap().group(GROUP).unwrap();
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    group.adapter().connect("edge-1", client);

    let (response, _) = serve(&engine, &FragmentRequest::get("/page")).await;
    assert_eq!(response.body_string(), "page #1");

    let read = tokio::time::timeout(Duration::from_millis(100), read_message(&mut server)).await;
    assert!(read.is_err(), "no message expected");
    assert!(group.uris_for("page:requestType=GET").is_empty());
}

/// 测试通过 TCP 连接的边缘节点收到推送
#[tokio::test]
async fn test_tcp_edge_receives_publish() {
    setup_logging();
    let (engine, _store) = build_engine(external_config(), renderer());
    let group = engine.external().unwrap().group(GROUP).unwrap();
    let adapter = group.adapter().clone();
    let listener = ExternalCacheListener::bind("127.0.0.1:0", group.clone())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = listener.spawn();

    let mut edge = TcpStream::connect(addr).await.unwrap();
    for _ in 0..50 {
        if adapter.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(adapter.len(), 1);

    serve(&engine, &product_request("3")).await.1.unwrap();
    let message = tokio::time::timeout(Duration::from_secs(2), read_message(&mut edge))
        .await
        .unwrap()
        .unwrap();
    match message {
        Some(Message::Add(entry)) => assert_eq!(entry.uri, "/product?id=3"),
        other => panic!("unexpected message {:?}", other),
    }
    assert_eq!(group.uris_for("product=3"), vec!["/product?id=3".to_string()]);

    // 边缘节点自行移除后失效索引随之清理
    let remove = Message::Remove {
        vhost: "shop.example".to_string(),
        uri: "/product?id=3".to_string(),
    };
    edge.write_all(&encode(&remove).unwrap()).await.unwrap();
    for _ in 0..50 {
        if group.uris_for("product=3").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(group.uris_for("product=3").is_empty());
    assert!(adapter.hosts_for("/product?id=3").is_empty());

    engine.external().unwrap().shutdown().await;
    assert!(adapter.is_empty());
    handle.abort();
}
