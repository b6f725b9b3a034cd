//! 可观测性：tracing 订阅器与 panic 钩子

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志：优先使用 RUST_LOG，未设置时默认 info
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// 任何线程 panic 都记录后以状态码 1 退出，避免服务半死不活地继续运行
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%location, "Fatal panic: {}", payload);
        eprintln!("fatal: panic at {}: {}", location, payload);
        std::process::exit(1);
    }));
}
