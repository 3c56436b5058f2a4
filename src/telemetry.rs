//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段缓存引擎的日志初始化功能。

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// 初始化 tracing 日志
///
/// 此函数应该在应用程序启动时调用一次。
///
/// # 参数
///
/// * `filter` - 日志过滤指令（例如 "info" 或 "oxfrag=debug"），
///   设置了 `RUST_LOG` 环境变量时以环境变量为准
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // 注意：这可能会与其他 tracing 初始化冲突，所以通常由应用层决定
    let _ = Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
