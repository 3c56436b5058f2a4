//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段组合树：分派目标、节点缓存信息、组合节点及其对象池。

pub mod composer;
pub mod info;
pub mod pool;
pub mod target;

pub use composer::{CacheType, ContentItem, FragmentComposer, ValueSet};
pub use info::FragmentInfo;
pub use pool::ComposerPool;
pub use target::{DispatchKind, DispatchTarget};
