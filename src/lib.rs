//! oxfrag - 分层片段缓存库
//!
//! 缓存动态生成页面中每个 include/forward 片段的输出，支持子片段内联、
//! 响应副作用回放、边缘节点（ESI）委托以及外部边缘缓存同步。

#![doc(html_root_url = "https://docs.rs/oxfrag/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod cli;
pub mod compose;
pub mod config;
pub mod error;
pub mod esi;
pub mod external;
pub mod hook;
pub mod http;
pub mod key;
pub mod memento;
pub mod metrics;
pub mod serialization;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod utils;

// Re-export commonly used items
pub use compose::{CacheType, DispatchTarget, FragmentComposer};
pub use config::{Config, FragmentPolicy};
pub use error::{FragmentError, Result};
pub use hook::{
    AsyncContinuation, AsyncResume, FragmentCacheEngine, FragmentReport, RenderContext,
    RenderStatus, Renderer,
};
pub use http::{AttributeMap, FragmentRequest, MemoryResponse, RequestView, ResponseSink};
pub use key::{CacheKeyDescriptor, KeyResolver};
pub use memento::FragmentMemento;
pub use store::{FragmentStore, MemoryStore};

/// oxfrag 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
