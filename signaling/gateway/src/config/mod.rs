//! 网关配置模块
//!
//! 该模块提供网关的配置管理功能,包括:
//! - TOML 配置文件加载和解析
//! - 环境变量覆盖
//! - 各配置段的默认值

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tether_signaling_common::{SignalingError, SignalingResult};
use tracing::{info, warn};

/// 网关配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayConfig {
    /// 监听配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 存活探测配置
    #[serde(default)]
    pub liveness: LivenessConfig,
    /// 匹配策略配置
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,
    /// 消息限制配置
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// 监听配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_address")]
    pub address: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket 升级路径
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// 存活探测配置
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// 探测周期（秒）
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

/// 匹配策略配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MatchmakingConfig {
    /// 对端断开后是否将存活一方自动重新入队
    ///
    /// 默认关闭:恢复会话需要客户端重新建立连接并重新匹配
    #[serde(default)]
    pub auto_requeue: bool,
}

/// 消息限制配置
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// 单条消息最大字节数
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            ws_path: default_ws_path(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl GatewayConfig {
    /// 探测周期
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.probe_interval_secs.max(1))
    }

    /// 应用环境变量覆盖
    ///
    /// 优先级:环境变量 > 配置文件 > 默认值
    fn apply_env_overrides(&mut self) {
        if let Some(port) = env::var("PORT").ok().and_then(|v| v.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Ok(address) = env::var("TETHER_LISTEN_ADDR") {
            self.server.address = address;
        }
        if let Some(secs) = env::var("TETHER_PROBE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.liveness.probe_interval_secs = secs;
        }
        if let Some(requeue) = env::var("TETHER_AUTO_REQUEUE")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
        {
            self.matchmaking.auto_requeue = requeue;
        }
    }
}

/// 加载网关配置
///
/// 候选路径:`TETHER_CONFIG_PATH` 环境变量 > ./config/gateway.toml >
/// ../config/gateway.toml;全部缺失时使用默认配置
pub fn load_config(path: Option<&str>) -> SignalingResult<GatewayConfig> {
    let explicit = path
        .map(str::to_string)
        .or_else(|| env::var("TETHER_CONFIG_PATH").ok());

    let candidate = match explicit {
        Some(p) => Some(p),
        None => ["./config/gateway.toml", "../config/gateway.toml"]
            .iter()
            .find(|p| Path::new(p).exists())
            .map(|p| p.to_string()),
    };

    let mut config = match candidate {
        Some(file) => {
            info!(config_path = %file, "Loading configuration");
            let raw = std::fs::read_to_string(&file)
                .map_err(|e| SignalingError::Config(format!("read {}: {}", file, e)))?;
            toml::from_str::<GatewayConfig>(&raw)
                .map_err(|e| SignalingError::Config(format!("parse {}: {}", file, e)))?
        }
        None => {
            warn!("No configuration file found, using defaults");
            GatewayConfig::default()
        }
    };

    config.apply_env_overrides();
    Ok(config)
}
