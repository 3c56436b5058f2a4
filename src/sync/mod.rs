//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段缓存的同步机制，目前包括按缓存键的单飞渲染控制。

pub mod single_flight;

pub use single_flight::PinTable;
