use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{Config, RegistryConfig};
use crate::services::registry::http_impl;
use crate::services::registry::{LeaseStore, RegistryService};

pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_address()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(
        address = %addr,
        lease_secs = config.registry.lease_duration,
        sweep_secs = config.registry.eviction_sweep_interval,
        "Registry server listening"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    serve(listener, config.registry, shutdown).await?;
    Ok(())
}

/// 在给定监听器上运行注册中心，直到取消令牌触发
pub async fn serve(
    listener: TcpListener,
    config: RegistryConfig,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    // 初始化服务注册表
    let service = Arc::new(RegistryService::new(LeaseStore::new(), config));
    serve_service(listener, service, shutdown).await
}

/// 用已有的注册中心服务对外提供 HTTP 接口，注册表状态在多次启动之间保留
pub async fn serve_service(
    listener: TcpListener,
    service: Arc<RegistryService>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let tracker = TaskTracker::new();
    service.start_sweeper(&tracker, shutdown.child_token());
    tracker.close();

    let app = http_impl::router(service.clone());
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    shutdown.cancel();
    tracker.wait().await;
    tracing::info!(
        remaining_instances = service.store().instance_count(),
        "Registry server shut down"
    );
    result
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
