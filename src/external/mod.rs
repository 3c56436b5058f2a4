//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了与外部边缘缓存的同步：二进制协议、连接集合、失效索引和连接监听。

pub mod adapter;
pub mod connection;
pub mod group;
pub mod listener;
pub mod protocol;

pub use adapter::ExternalCacheAdapter;
pub use connection::ExternalConnection;
pub use group::{ExternalCacheGroup, ExternalCacheRegistry};
pub use listener::ExternalCacheListener;
pub use protocol::{ExternalEntry, Message};
