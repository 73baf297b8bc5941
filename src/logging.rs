//! 日志初始化

use tracing_subscriber::{fmt, EnvFilter};

/// 初始化 tracing 订阅器。RUST_LOG 可覆盖默认级别
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
