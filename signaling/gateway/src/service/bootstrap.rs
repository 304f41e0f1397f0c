//! 应用启动器 - 负责服务启动和生命周期
//!
//! 接受循环和存活监控是仅有的两类后台任务:
//! 每条接入连接各占一个任务,探测器独立于消息流运行

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::load_config;
use crate::domain::service::PairRegistry;
use crate::interface::http::{self, AcceptContext};
use crate::metrics::SignalingGatewayMetrics;
use crate::service::wire::{self, ApplicationContext};

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run() -> Result<()> {
        let config = load_config(None)?;
        let context = wire::initialize(config);
        let handle = start_gateway(&context).await?;
        info!(address = %handle.local_addr(), "signaling gateway started");

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("shutdown signal received, stopping");
        handle.shutdown();
        Ok(())
    }
}

/// 运行中的网关句柄
pub struct GatewayHandle {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

impl GatewayHandle {
    /// 实际绑定地址(端口 0 时由系统分配)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止接受新连接和存活探测
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.monitor_task.abort();
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 绑定监听端口并启动网关后台任务
pub async fn start_gateway(context: &ApplicationContext) -> Result<GatewayHandle> {
    let bind_addr = (
        context.config.server.address.as_str(),
        context.config.server.port,
    );
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}:{}", bind_addr.0, bind_addr.1))?;
    let local_addr = tcp_listener
        .local_addr()
        .context("failed to read local address")?;

    let accept_ctx = Arc::new(AcceptContext {
        listener: context.listener.clone(),
        ws_path: context.config.server.ws_path.clone(),
        max_message_bytes: context.config.limits.max_message_bytes,
    });
    let accept_task = tokio::spawn(accept_loop(tcp_listener, accept_ctx));

    let monitor_task = tokio::spawn(liveness_loop(
        context.registry.clone(),
        context.metrics.clone(),
        context.config.probe_interval(),
    ));

    Ok(GatewayHandle {
        local_addr,
        accept_task,
        monitor_task,
    })
}

/// 接受循环
///
/// 单条连接的任何失败都不影响监听本身
async fn accept_loop(tcp_listener: TcpListener, ctx: Arc<AcceptContext>) {
    loop {
        match tcp_listener.accept().await {
            Ok((stream, peer_addr)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = http::serve_connection(stream, ctx).await {
                        debug!(%peer_addr, error = %err, "connection ended with error");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                // 避免持续性错误打满循环
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// 存活监控循环
///
/// 半开连接最多存活 1~2 个探测周期
async fn liveness_loop(
    registry: Arc<PairRegistry>,
    metrics: Arc<SignalingGatewayMetrics>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    // interval 的首次 tick 立即完成,跳过以保证整周期间隔
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let reaped = registry.sweep().await;
        if reaped > 0 {
            metrics.probe_failures_total.inc_by(reaped as u64);
            metrics.sync_counts(registry.counts().await);
        }
    }
}
