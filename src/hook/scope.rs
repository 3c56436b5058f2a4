//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了单个顶层请求范围内共享的状态，以及子片段分派时使用的请求视图。

use crate::compose::{DispatchKind, DispatchTarget};
use crate::esi::EdgeCapability;
use crate::http::RequestView;
use crate::utils::parse_query;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::warn;
use uuid::Uuid;

/// 顶层请求范围
///
/// 边缘能力在顶层协商一次，原样传给所有后代节点。
#[derive(Debug)]
pub struct RequestScope {
    id: Uuid,
    edge: EdgeCapability,
    marker: Option<String>,
    /// 本次请求已写入存储的缓存键
    populated: Mutex<HashSet<String>>,
}

impl RequestScope {
    pub fn new(edge: EdgeCapability, marker: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            edge,
            marker,
            populated: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn edge(&self) -> EdgeCapability {
        self.edge
    }

    /// 边缘回源请求携带的标记参数值
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// 登记缓存键的写入
    ///
    /// # 返回值
    ///
    /// 同一请求内第一次登记时返回 true
    pub fn populate_once(&self, key: &str) -> bool {
        let first = self
            .populated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
        if !first {
            warn!(
                "RequestScope[{}]: {} already populated in this request, skipping",
                self.id, key
            );
        }
        first
    }
}

/// 子片段分派时的请求视图
///
/// 路径替换为分派目标，分派目标携带的查询参数优先于外层请求的同名参数。
pub struct IncludedRequest<'a> {
    parent: &'a dyn RequestView,
    uri: String,
    servlet_path: String,
    query: Option<String>,
    params: HashMap<String, Vec<String>>,
}

impl<'a> IncludedRequest<'a> {
    pub fn new(parent: &'a dyn RequestView, target: &DispatchTarget) -> Self {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(query) = &target.query {
            for (k, v) in parse_query(query) {
                params.entry(k).or_default().push(v);
            }
        }
        let query = match (&target.query, parent.query_string()) {
            (Some(own), Some(outer)) if !outer.is_empty() => Some(format!("{}&{}", own, outer)),
            (Some(own), _) => Some(own.clone()),
            (None, outer) => outer.map(str::to_string),
        };
        let uri = match (target.kind, &target.query) {
            (DispatchKind::Request, _) => parent.request_uri().to_string(),
            (_, Some(q)) => format!("{}?{}", target.path, q),
            (_, None) => target.path.clone(),
        };
        Self {
            parent,
            uri,
            servlet_path: target.path.clone(),
            query,
            params,
        }
    }
}

impl RequestView for IncludedRequest<'_> {
    fn method(&self) -> &str {
        self.parent.method()
    }

    fn request_uri(&self) -> &str {
        &self.uri
    }

    fn servlet_path(&self) -> &str {
        &self.servlet_path
    }

    fn path_info(&self) -> Option<&str> {
        None
    }

    fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn parameter_values(&self, name: &str) -> Option<&[String]> {
        match self.params.get(name) {
            Some(values) => Some(values.as_slice()),
            None => self.parent.parameter_values(name),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.parent.header(name)
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.parent.cookie(name)
    }

    fn session_attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.parent.session_attribute(name)
    }

    fn locale(&self) -> Option<&str> {
        self.parent.locale()
    }

    fn character_encoding(&self) -> Option<&str> {
        self.parent.character_encoding()
    }
}
