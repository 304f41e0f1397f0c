//! Wire 风格的依赖注入
//!
//! 集中构建应用上下文,组件之间只通过这里发生装配

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::domain::service::PairRegistry;
use crate::interface::connection::GatewayListener;
use crate::metrics::SignalingGatewayMetrics;

/// 应用上下文
pub struct ApplicationContext {
    pub config: GatewayConfig,
    pub registry: Arc<PairRegistry>,
    pub metrics: Arc<SignalingGatewayMetrics>,
    pub listener: Arc<GatewayListener>,
}

/// 构建应用上下文
pub fn initialize(config: GatewayConfig) -> ApplicationContext {
    let registry = Arc::new(PairRegistry::new(config.matchmaking.auto_requeue));
    let metrics = Arc::new(SignalingGatewayMetrics::new());
    let listener = Arc::new(GatewayListener::new(registry.clone(), metrics.clone()));

    ApplicationContext {
        config,
        registry,
        metrics,
        listener,
    }
}
