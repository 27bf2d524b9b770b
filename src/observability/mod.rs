//! 可观测性：tracing 日志输出到 stderr（stdout 留给 JSON 行传输）

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认级别 info，可用 RUST_LOG 覆盖（如 `RUST_LOG=sseq=debug`）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}
