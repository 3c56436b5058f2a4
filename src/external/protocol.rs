//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了与边缘节点同步的二进制协议。
//!
//! 每条消息以大端 `int32` 操作码开头：
//!
//! * `ADD (0)`：vhost、uri、`int32` 内容长度、内容字节、contentType、contentEncoding、
//!   contentLanguage、contentCharset、eTag、expires、cacheControl
//! * `REMOVE (1)`：vhost、uri
//!
//! 字符串以 2 字节长度加 modified UTF-8 编码。

use crate::error::{FragmentError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const OP_ADD: i32 = 0;
pub const OP_REMOVE: i32 = 1;

/// 单个字符串编码后的最大字节数
pub const MAX_UTF_LEN: usize = 65_535;

/// 单条 ADD 消息的最大内容长度
pub const MAX_CONTENT_LEN: usize = 64 * 1024 * 1024;

lazy_static! {
    static ref CHARSET: Regex = Regex::new(r"(?i)charset\s*=\s*([^;\s]+)").expect("valid charset pattern");
}

/// 推送到边缘节点的片段
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExternalEntry {
    pub vhost: String,
    pub uri: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub content_encoding: String,
    pub content_language: String,
    pub content_charset: String,
    pub etag: String,
    pub expires: String,
    pub cache_control: String,
}

impl ExternalEntry {
    /// 根据响应头构造
    ///
    /// 头名称只转换一次小写，字符集从 Content-Type 中提取。
    pub fn from_headers(vhost: &str, uri: &str, content: Vec<u8>, headers: &[(String, String)]) -> Self {
        let lowered: HashMap<String, &str> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .collect();
        let header = |name: &str| lowered.get(name).map(|v| v.to_string()).unwrap_or_default();

        let content_type = header("content-type");
        let content_charset = CHARSET
            .captures(&content_type)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_matches('"').to_string())
            .unwrap_or_default();
        Self {
            vhost: vhost.to_string(),
            uri: uri.to_string(),
            content,
            content_encoding: header("content-encoding"),
            content_language: header("content-language"),
            etag: header("etag"),
            expires: header("expires"),
            cache_control: header("cache-control"),
            content_type,
            content_charset,
        }
    }
}

/// 协议消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Add(ExternalEntry),
    Remove { vhost: String, uri: String },
}

/// 编码消息
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match message {
        Message::Add(entry) => {
            buf.extend_from_slice(&OP_ADD.to_be_bytes());
            write_utf(&mut buf, &entry.vhost)?;
            write_utf(&mut buf, &entry.uri)?;
            let len = i32::try_from(entry.content.len()).map_err(|_| {
                FragmentError::ProtocolFraming(format!("content of {} too large", entry.uri))
            })?;
            buf.extend_from_slice(&len.to_be_bytes());
            buf.extend_from_slice(&entry.content);
            for field in [
                &entry.content_type,
                &entry.content_encoding,
                &entry.content_language,
                &entry.content_charset,
                &entry.etag,
                &entry.expires,
                &entry.cache_control,
            ] {
                write_utf(&mut buf, field)?;
            }
        }
        Message::Remove { vhost, uri } => {
            buf.extend_from_slice(&OP_REMOVE.to_be_bytes());
            write_utf(&mut buf, vhost)?;
            write_utf(&mut buf, uri)?;
        }
    }
    Ok(buf)
}

/// 以 modified UTF-8 写出字符串
///
/// NUL 编码为两个字节，补充平面字符按 UTF-16 代理对分别编码为三个字节。
pub fn write_utf(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    let mut encoded = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => encoded.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                encoded.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                encoded.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                encoded.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                encoded.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                encoded.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    if encoded.len() > MAX_UTF_LEN {
        return Err(FragmentError::ProtocolFraming(format!(
            "encoded string too long: {} bytes",
            encoded.len()
        )));
    }
    buf.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
    buf.extend_from_slice(&encoded);
    Ok(())
}

/// 解码 modified UTF-8 字节
pub fn decode_utf(bytes: &[u8]) -> Result<String> {
    let malformed = || FragmentError::ProtocolFraming("malformed modified UTF-8".to_string());
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let (unit, width) = match b >> 4 {
            0x0..=0x7 => (b as u16, 1),
            0xC | 0xD => {
                let b2 = *bytes.get(i + 1).ok_or_else(malformed)?;
                if b2 & 0xC0 != 0x80 {
                    return Err(malformed());
                }
                ((((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16, 2)
            }
            0xE => {
                let b2 = *bytes.get(i + 1).ok_or_else(malformed)?;
                let b3 = *bytes.get(i + 2).ok_or_else(malformed)?;
                if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                    return Err(malformed());
                }
                (
                    (((b & 0x0F) as u16) << 12) | (((b2 & 0x3F) as u16) << 6) | (b3 & 0x3F) as u16,
                    3,
                )
            }
            _ => return Err(malformed()),
        };
        units.push(unit);
        i += width;
    }
    String::from_utf16(&units).map_err(|_| malformed())
}

async fn read_utf<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = reader.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    decode_utf(&buf)
}

/// 读取一条消息
///
/// # 返回值
///
/// 连接在消息边界上正常关闭时返回 `Ok(None)`；未知操作码返回
/// [`FragmentError::ProtocolFraming`]。
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Message>> {
    let op = match reader.read_i32().await {
        Ok(op) => op,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match op {
        OP_ADD => {
            let vhost = read_utf(reader).await?;
            let uri = read_utf(reader).await?;
            let len = reader.read_i32().await?;
            let len = usize::try_from(len)
                .ok()
                .filter(|l| *l <= MAX_CONTENT_LEN)
                .ok_or_else(|| {
                    FragmentError::ProtocolFraming(format!("invalid content length {}", len))
                })?;
            let mut content = vec![0u8; len];
            reader.read_exact(&mut content).await?;
            let mut fields = Vec::with_capacity(7);
            for _ in 0..7 {
                fields.push(read_utf(reader).await?);
            }
            let mut fields = fields.into_iter();
            let mut next = || fields.next().unwrap_or_default();
            Ok(Some(Message::Add(ExternalEntry {
                vhost,
                uri,
                content,
                content_type: next(),
                content_encoding: next(),
                content_language: next(),
                content_charset: next(),
                etag: next(),
                expires: next(),
                cache_control: next(),
            })))
        }
        OP_REMOVE => {
            let vhost = read_utf(reader).await?;
            let uri = read_utf(reader).await?;
            Ok(Some(Message::Remove { vhost, uri }))
        }
        other => Err(FragmentError::ProtocolFraming(format!(
            "unexpected operation {}",
            other
        ))),
    }
}
