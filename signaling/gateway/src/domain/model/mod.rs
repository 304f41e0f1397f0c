//! 连接领域模型
//!
//! 职责:描述单个客户端长连接在网关内的状态
//!
//! 设计要点:
//! - 连接身份即存活通道本身,对外不暴露业务 ID,注册表内部用随机 UUID 索引
//! - 配对关系是对称的索引查找,不做相互持有,避免所有权环
//! - 状态迁移全部由注册表在临界区内完成

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use tether_signaling_common::{RelayPayload, ServerEvent};

/// 连接标识
///
/// 仅在网关进程内有意义,用作注册表索引和日志字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 连接状态机
///
/// 迁移规则:
/// - `Idle -> Waiting`:接入时无人可配对
/// - `Idle -> Paired`:接入时等待槽有存活占位者,双方一起迁移
/// - `Waiting -> Paired`:新连接到达并与之配对
/// - 任意状态 `-> Closed`:传输关闭、显式断开或探测失败
///
/// `Paired` 不会回到 `Idle`:对端离开后存活一方保持 `Paired`(无伙伴),
/// 直到自身关闭;开启自动重新入队时则回到 `Waiting`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Waiting,
    Paired,
    Closed,
}

impl ConnectionState {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// 下行帧
///
/// 每个连接的写半边由独立队列驱动,推送失败视为连接已不可写并静默丢弃
#[derive(Debug)]
pub enum OutboundFrame {
    /// 网关控制事件
    Event(ServerEvent),
    /// 对端透传消息,内容原样送达
    Relay(RelayPayload),
    /// 存活探测,落地为传输层 Ping 帧
    Probe,
    /// 要求连接任务关闭传输并退出
    Shutdown,
}

/// 注册表内的连接记录
#[derive(Debug)]
pub struct PeerConnection {
    /// 写半边队列
    pub sender: mpsc::UnboundedSender<OutboundFrame>,
    /// 当前状态
    pub state: ConnectionState,
    /// 配对对端,非空时必然对称
    pub partner: Option<ConnectionId>,
    /// 存活标记,发出探测时清除,收到 Pong 时恢复
    pub alive: bool,
    /// 接入时间
    pub connected_at: DateTime<Utc>,
}

impl PeerConnection {
    pub fn new(sender: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            sender,
            state: ConnectionState::Idle,
            partner: None,
            alive: true,
            connected_at: Utc::now(),
        }
    }

    /// 通道是否仍可写
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}
