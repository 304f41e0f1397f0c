//! 信令服务错误类型定义

use thiserror::Error;

/// 信令服务错误类型
#[derive(Debug, Error)]
pub enum SignalingError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 传输层错误（握手失败、读写失败）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 协议信封无法解析
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 信令服务结果类型
pub type SignalingResult<T> = Result<T, SignalingError>;

impl From<std::io::Error> for SignalingError {
    fn from(err: std::io::Error) -> Self {
        SignalingError::Transport(err.to_string())
    }
}
