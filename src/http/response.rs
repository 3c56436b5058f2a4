//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了响应输出接口及其内存实现。

use crate::error::{FragmentError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 输出模式
///
/// 一个输出流在其生命周期内只能使用字节或字符中的一种。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    None,
    Bytes,
    Chars,
}

impl OutputMode {
    /// 在当前模式下切换到 `wanted`，已处于另一种模式时返回错误
    pub fn switch_to(&mut self, wanted: OutputMode) -> Result<()> {
        match (*self, wanted) {
            (OutputMode::None, w) => {
                *self = w;
                Ok(())
            }
            (current, w) if current == w => Ok(()),
            (current, w) => Err(FragmentError::OutputMode(format!(
                "cannot write {:?} output after {:?} output",
                w, current
            ))),
        }
    }
}

/// 响应 Cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            secure: false,
            http_only: false,
        }
    }
}

/// 响应输出接口
///
/// 由协作方的适配器实现。响应提交后，对头部、状态等元数据的修改应被忽略。
pub trait ResponseSink: Send {
    /// 写出字节内容
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// 写出字符内容
    fn write_str(&mut self, data: &str) -> Result<()>;

    /// 响应是否已提交（头部已发送）
    fn is_committed(&self) -> bool;

    /// 刷新并提交响应
    fn flush(&mut self) -> Result<()>;

    /// 丢弃尚未提交的输出，头部和状态保留
    ///
    /// # 返回值
    ///
    /// 响应已提交时不做任何修改并返回 false
    fn reset_buffer(&mut self) -> bool;

    fn set_header(&mut self, name: &str, value: &str);

    fn add_header(&mut self, name: &str, value: &str);

    /// 读取响应头（名称不区分大小写）
    fn header(&self, name: &str) -> Option<String>;

    fn add_cookie(&mut self, cookie: &Cookie);

    fn set_status(&mut self, status: u16);

    fn status(&self) -> u16;

    fn set_content_type(&mut self, content_type: &str);

    fn content_type(&self) -> Option<String>;

    fn set_content_length(&mut self, length: u64);

    fn set_character_encoding(&mut self, encoding: &str);

    fn character_encoding(&self) -> Option<String>;

    fn set_locale(&mut self, locale: &str);

    fn send_redirect(&mut self, location: &str) -> Result<()>;
}

/// 内存响应
///
/// 缓冲输出，超过 `buffer_size` 后视为已提交。
#[derive(Debug, Clone)]
pub struct MemoryResponse {
    body: Vec<u8>,
    mode: OutputMode,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    status: u16,
    content_type: Option<String>,
    content_length: Option<u64>,
    character_encoding: Option<String>,
    locale: Option<String>,
    redirect: Option<String>,
    committed: bool,
    buffer_size: usize,
}

impl Default for MemoryResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResponse {
    pub fn new() -> Self {
        Self::with_buffer_size(8192)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            body: Vec::new(),
            mode: OutputMode::None,
            headers: Vec::new(),
            cookies: Vec::new(),
            status: 200,
            content_type: None,
            content_length: None,
            character_encoding: None,
            locale: None,
            redirect: None,
            committed: false,
            buffer_size,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn redirect(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    fn append(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
        if self.body.len() >= self.buffer_size {
            self.committed = true;
        }
    }

    fn mutable(&self, what: &str) -> bool {
        if self.committed {
            debug!("MemoryResponse: ignoring {} after commit", what);
        }
        !self.committed
    }
}

impl ResponseSink for MemoryResponse {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.mode.switch_to(OutputMode::Bytes)?;
        self.append(data);
        Ok(())
    }

    fn write_str(&mut self, data: &str) -> Result<()> {
        self.mode.switch_to(OutputMode::Chars)?;
        self.append(data.as_bytes());
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.committed
    }

    fn flush(&mut self) -> Result<()> {
        self.committed = true;
        Ok(())
    }

    fn reset_buffer(&mut self) -> bool {
        if self.committed {
            return false;
        }
        self.body.clear();
        true
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if self.mutable("set_header") {
            let lower = name.to_ascii_lowercase();
            self.headers.retain(|(n, _)| *n != lower);
            self.headers.push((lower, value.to_string()));
        }
    }

    fn add_header(&mut self, name: &str, value: &str) {
        if self.mutable("add_header") {
            self.headers
                .push((name.to_ascii_lowercase(), value.to_string()));
        }
    }

    fn header(&self, name: &str) -> Option<String> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, v)| v.clone())
    }

    fn add_cookie(&mut self, cookie: &Cookie) {
        if self.mutable("add_cookie") {
            self.cookies.push(cookie.clone());
        }
    }

    fn set_status(&mut self, status: u16) {
        if self.mutable("set_status") {
            self.status = status;
        }
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn set_content_type(&mut self, content_type: &str) {
        if self.mutable("set_content_type") {
            self.content_type = Some(content_type.to_string());
        }
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }

    fn set_content_length(&mut self, length: u64) {
        if self.mutable("set_content_length") {
            self.content_length = Some(length);
        }
    }

    fn set_character_encoding(&mut self, encoding: &str) {
        if self.mutable("set_character_encoding") {
            self.character_encoding = Some(encoding.to_string());
        }
    }

    fn character_encoding(&self) -> Option<String> {
        self.character_encoding.clone()
    }

    fn set_locale(&mut self, locale: &str) {
        if self.mutable("set_locale") {
            self.locale = Some(locale.to_string());
        }
    }

    fn send_redirect(&mut self, location: &str) -> Result<()> {
        if self.committed {
            return Err(FragmentError::Replay(format!(
                "cannot redirect to {} after the response is committed",
                location
            )));
        }
        self.status = 302;
        self.set_header("location", location);
        self.redirect = Some(location.to_string());
        self.committed = true;
        Ok(())
    }
}
