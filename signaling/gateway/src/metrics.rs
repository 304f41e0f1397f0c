//! # Prometheus 指标收集模块
//!
//! 网关进程级指标,通过 `/metrics` 以文本格式暴露。

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::domain::service::RegistryCounts;

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 信令网关指标
pub struct SignalingGatewayMetrics {
    /// 当前打开的连接数
    pub connections_active: IntGauge,
    /// 当前配对数
    pub pairs_active: IntGauge,
    /// 等待槽占用(0 或 1)
    pub waiting_occupied: IntGauge,
    /// 累计转发消息数
    pub messages_relayed_total: IntCounter,
    /// 累计配对次数
    pub pairs_formed_total: IntCounter,
    /// 累计拆除次数
    pub teardowns_total: IntCounter,
    /// 累计探测失败强制关闭数
    pub probe_failures_total: IntCounter,
}

impl SignalingGatewayMetrics {
    pub fn new() -> Self {
        let connections_active = IntGauge::new(
            "signaling_connections_active",
            "Number of currently open connections",
        )
        .expect("Failed to create signaling_connections_active metric");

        let pairs_active = IntGauge::new(
            "signaling_pairs_active",
            "Number of currently linked pairs",
        )
        .expect("Failed to create signaling_pairs_active metric");

        let waiting_occupied = IntGauge::new(
            "signaling_waiting_occupied",
            "Whether the waiting slot is occupied (0 or 1)",
        )
        .expect("Failed to create signaling_waiting_occupied metric");

        let messages_relayed_total = IntCounter::new(
            "signaling_messages_relayed_total",
            "Total number of messages relayed between partners",
        )
        .expect("Failed to create signaling_messages_relayed_total metric");

        let pairs_formed_total = IntCounter::new(
            "signaling_pairs_formed_total",
            "Total number of pairs formed",
        )
        .expect("Failed to create signaling_pairs_formed_total metric");

        let teardowns_total = IntCounter::new(
            "signaling_teardowns_total",
            "Total number of connection teardowns",
        )
        .expect("Failed to create signaling_teardowns_total metric");

        let probe_failures_total = IntCounter::new(
            "signaling_probe_failures_total",
            "Total number of connections closed after failed liveness probes",
        )
        .expect("Failed to create signaling_probe_failures_total metric");

        // 注册指标,忽略重复注册错误(测试中可能会重复创建)
        let _ = REGISTRY.register(Box::new(connections_active.clone()));
        let _ = REGISTRY.register(Box::new(pairs_active.clone()));
        let _ = REGISTRY.register(Box::new(waiting_occupied.clone()));
        let _ = REGISTRY.register(Box::new(messages_relayed_total.clone()));
        let _ = REGISTRY.register(Box::new(pairs_formed_total.clone()));
        let _ = REGISTRY.register(Box::new(teardowns_total.clone()));
        let _ = REGISTRY.register(Box::new(probe_failures_total.clone()));

        Self {
            connections_active,
            pairs_active,
            waiting_occupied,
            messages_relayed_total,
            pairs_formed_total,
            teardowns_total,
            probe_failures_total,
        }
    }

    /// 用注册表快照同步各 gauge
    pub fn sync_counts(&self, counts: RegistryCounts) {
        self.connections_active.set(counts.connections as i64);
        self.pairs_active.set(counts.pairs as i64);
        self.waiting_occupied.set(i64::from(counts.waiting));
    }

    /// 按 Prometheus 文本格式导出全部指标
    pub fn gather_text() -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for SignalingGatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
