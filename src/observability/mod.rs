//! 可观测性：tracing 日志初始化
//!
//! 默认级别 info，可通过 RUST_LOG 覆盖；日志写 stderr，stdout 留给事件流。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    init_with_default("info");
}

/// RUST_LOG 未设置或无法解析时使用 default_directive
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
