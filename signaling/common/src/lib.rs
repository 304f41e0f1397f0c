//! Tether Signaling Common
//!
//! 信令服务共享代码库,包含:
//! - 线上协议信封 (protocol)
//! - 共享错误类型 (error)
//!
//! 被 gateway 及后续信令子模块共同使用

pub mod error;
pub mod protocol;

// 导出常用类型
pub use error::{SignalingError, SignalingResult};
pub use protocol::{ClientControl, RelayPayload, ServerEvent};
