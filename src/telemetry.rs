//! 日志初始化 (tracing)

use tracing_subscriber::EnvFilter;

/// 安装全局日志订阅者。`RUST_LOG` 优先于 `default_level`;重复调用无副作用。
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false)
        .try_init();
}
