//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了渲染期间记录的响应元数据副作用，回放时重新施加到响应上。

use super::response::{Cookie, ResponseSink};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 响应副作用
///
/// 每个变体只携带自己的负载字段，通过 [`SideEffect::apply`] 统一施加。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    AddCookie(Cookie),
    Header {
        name: String,
        value: String,
        add: bool,
    },
    DateHeader {
        name: String,
        millis: i64,
        add: bool,
    },
    IntHeader {
        name: String,
        value: i64,
        add: bool,
    },
    Status {
        code: u16,
    },
    ContentType(String),
    ContentLength(u64),
    CharacterEncoding(String),
    Locale(String),
    Redirect(String),
}

impl SideEffect {
    /// 将副作用施加到响应
    pub fn apply(&self, sink: &mut dyn ResponseSink) -> Result<()> {
        match self {
            SideEffect::AddCookie(cookie) => sink.add_cookie(cookie),
            SideEffect::Header { name, value, add } => put_header(sink, name, value, *add),
            SideEffect::DateHeader { name, millis, add } => {
                put_header(sink, name, &format_http_date(*millis), *add)
            }
            SideEffect::IntHeader { name, value, add } => {
                put_header(sink, name, &value.to_string(), *add)
            }
            SideEffect::Status { code } => sink.set_status(*code),
            SideEffect::ContentType(ct) => sink.set_content_type(ct),
            SideEffect::ContentLength(len) => sink.set_content_length(*len),
            SideEffect::CharacterEncoding(enc) => sink.set_character_encoding(enc),
            SideEffect::Locale(locale) => sink.set_locale(locale),
            SideEffect::Redirect(location) => sink.send_redirect(location)?,
        }
        Ok(())
    }

    /// Cookie 副作用对应的 Cookie 名称
    pub fn cookie_name(&self) -> Option<&str> {
        match self {
            SideEffect::AddCookie(cookie) => Some(&cookie.name),
            _ => None,
        }
    }
}

fn put_header(sink: &mut dyn ResponseSink, name: &str, value: &str, add: bool) {
    if add {
        sink.add_header(name, value);
    } else {
        sink.set_header(name, value);
    }
}

/// 按 RFC 1123 格式化毫秒时间戳
pub fn format_http_date(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
