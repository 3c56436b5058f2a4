//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了引擎与协作方之间的请求/响应能力接口。
//!
//! 引擎只通过 [`RequestView`]、[`AttributeMap`] 和 [`ResponseSink`] 读取请求、
//! 读写属性和写出响应，具体的适配器由协作方持有。

pub mod attributes;
pub mod request;
pub mod response;
pub mod side_effect;

pub use attributes::{AttributeChanges, AttributeMap, AttributeValue};
pub use request::{FragmentRequest, RequestView};
pub use response::{Cookie, MemoryResponse, OutputMode, ResponseSink};
pub use side_effect::SideEffect;
