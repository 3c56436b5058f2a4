//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了只读请求视图接口及其内存实现。

use std::collections::{BTreeMap, HashMap};

/// 只读请求视图
///
/// 由协作方的适配器实现，引擎只通过该接口读取请求信息。
pub trait RequestView: Send + Sync {
    /// 请求方法（GET、POST ...）
    fn method(&self) -> &str;

    /// 请求路径（不含查询串）
    fn request_uri(&self) -> &str;

    /// Servlet 路径
    fn servlet_path(&self) -> &str;

    /// 额外路径信息
    fn path_info(&self) -> Option<&str>;

    /// 原始查询串
    fn query_string(&self) -> Option<&str>;

    /// 参数的全部取值
    fn parameter_values(&self, name: &str) -> Option<&[String]>;

    /// 请求头（名称不区分大小写）
    fn header(&self, name: &str) -> Option<&str>;

    /// Cookie 值
    fn cookie(&self, name: &str) -> Option<&str>;

    /// 会话属性
    fn session_attribute(&self, name: &str) -> Option<&serde_json::Value>;

    /// 请求区域设置
    fn locale(&self) -> Option<&str>;

    /// 请求显式声明的字符编码
    fn character_encoding(&self) -> Option<&str>;

    /// 参数的第一个取值
    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameter_values(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    /// 虚拟主机名
    fn host(&self) -> Option<&str> {
        self.header("host")
    }
}

/// 内存请求
///
/// `RequestView` 的简单实现，供测试、基准和命令行使用。
#[derive(Debug, Clone, Default)]
pub struct FragmentRequest {
    method: String,
    request_uri: String,
    servlet_path: String,
    path_info: Option<String>,
    query_string: Option<String>,
    parameters: BTreeMap<String, Vec<String>>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    session: HashMap<String, serde_json::Value>,
    locale: Option<String>,
    character_encoding: Option<String>,
}

impl FragmentRequest {
    /// 创建请求，`uri` 中的查询串会被解析为参数
    pub fn new(method: &str, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (uri, None),
        };
        let mut request = Self {
            method: method.to_ascii_uppercase(),
            request_uri: path.to_string(),
            servlet_path: path.to_string(),
            ..Default::default()
        };
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                request
                    .parameters
                    .entry(k.to_string())
                    .or_default()
                    .push(v.replace('+', " "));
            }
            request.query_string = Some(query.to_string());
        }
        request
    }

    pub fn get(uri: &str) -> Self {
        Self::new("GET", uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new("POST", uri)
    }

    /// 追加参数，同时追加到查询串
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.parameters
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        let pair = format!("{}={}", name, value);
        self.query_string = Some(match self.query_string.take() {
            Some(q) if !q.is_empty() => format!("{}&{}", q, pair),
            _ => pair,
        });
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn session(mut self, name: &str, value: serde_json::Value) -> Self {
        self.session.insert(name.to_string(), value);
        self
    }

    pub fn servlet_path(mut self, path: &str) -> Self {
        self.servlet_path = path.to_string();
        self
    }

    pub fn path_info(mut self, info: &str) -> Self {
        self.path_info = Some(info.to_string());
        self
    }

    pub fn locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    pub fn character_encoding(mut self, encoding: &str) -> Self {
        self.character_encoding = Some(encoding.to_string());
        self
    }
}

impl RequestView for FragmentRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn request_uri(&self) -> &str {
        &self.request_uri
    }

    fn servlet_path(&self) -> &str {
        &self.servlet_path
    }

    fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    fn parameter_values(&self, name: &str) -> Option<&[String]> {
        self.parameters.get(name).map(|v| v.as_slice())
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|s| s.as_str())
    }

    fn session_attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.session.get(name)
    }

    fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    fn character_encoding(&self) -> Option<&str> {
        self.character_encoding.as_deref()
    }
}
