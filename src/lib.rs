pub mod config;
pub mod server;
pub mod services;

/// 初始化日志，`RUST_LOG` 未设置时默认 info
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
