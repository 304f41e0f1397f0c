//! 配对注册表
//!
//! 职责:集中持有等待槽与配对索引,完成匹配、转发寻址与拆除
//!
//! 设计要点:
//! 1. 唯一的共享状态所有者,等待槽和 partner 指针只在这里修改,
//!    回调上下文不直接触碰任何字段
//! 2. 单把锁构成全局临界区,并发接入被串行化,
//!    保证"最多一个等待者"不变式
//! 3. 转发只在锁内完成对端寻址和入队,入队本身非阻塞,
//!    不会在持锁期间等待任何对端

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tether_signaling_common::{RelayPayload, ServerEvent};

use crate::domain::model::{ConnectionId, ConnectionState, OutboundFrame, PeerConnection};

/// 接入匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// 与等待者配对成功
    Paired(ConnectionId),
    /// 进入等待槽
    Waiting,
}

/// 注册表快照计数,用于健康上报与指标
#[derive(Debug, Clone, Copy)]
pub struct RegistryCounts {
    pub connections: usize,
    pub pairs: usize,
    pub waiting: bool,
}

#[derive(Default)]
struct RegistryInner {
    /// 等待槽:全进程至多一个未配对连接
    waiting: Option<ConnectionId>,
    peers: HashMap<ConnectionId, PeerConnection>,
}

impl RegistryInner {
    /// 为 `id` 执行一次匹配
    ///
    /// 槽内占位者已关闭或状态不符时按空槽处理,直接落槽
    fn matchmake(&mut self, id: ConnectionId) -> MatchOutcome {
        let occupant = self.waiting.take().filter(|w| {
            self.peers
                .get(w)
                .map(|p| p.is_open() && p.state == ConnectionState::Waiting)
                .unwrap_or(false)
        });

        match occupant {
            Some(waiting_id) if waiting_id != id => {
                if let Some(peer) = self.peers.get_mut(&waiting_id) {
                    peer.partner = Some(id);
                    peer.state = ConnectionState::Paired;
                    let _ = peer.sender.send(OutboundFrame::Event(ServerEvent::Match));
                }
                if let Some(peer) = self.peers.get_mut(&id) {
                    peer.partner = Some(waiting_id);
                    peer.state = ConnectionState::Paired;
                    let _ = peer.sender.send(OutboundFrame::Event(ServerEvent::Match));
                }
                MatchOutcome::Paired(waiting_id)
            }
            _ => {
                if let Some(peer) = self.peers.get_mut(&id) {
                    peer.state = ConnectionState::Waiting;
                    let _ = peer.sender.send(OutboundFrame::Event(ServerEvent::Waiting));
                }
                self.waiting = Some(id);
                MatchOutcome::Waiting
            }
        }
    }
}

/// 配对注册表
pub struct PairRegistry {
    /// 对端断开后是否自动将存活一方重新入队
    auto_requeue: bool,
    inner: Mutex<RegistryInner>,
}

impl PairRegistry {
    pub fn new(auto_requeue: bool) -> Self {
        Self {
            auto_requeue,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// 接入新连接并立即匹配
    ///
    /// 插入与匹配在同一临界区内完成,两侧的 `match` 通知都先于
    /// 任何后续转发入队
    pub async fn attach(
        &self,
        sender: tokio::sync::mpsc::UnboundedSender<OutboundFrame>,
    ) -> (ConnectionId, MatchOutcome) {
        let id = ConnectionId::new();
        let mut inner = self.inner.lock().await;
        inner.peers.insert(id, PeerConnection::new(sender));
        let outcome = inner.matchmake(id);
        match outcome {
            MatchOutcome::Paired(partner_id) => {
                info!(connection_id = %id, partner_id = %partner_id, "pair formed");
            }
            MatchOutcome::Waiting => {
                info!(connection_id = %id, "connection entered waiting slot");
            }
        }
        (id, outcome)
    }

    /// 将消息原样转发给对端
    ///
    /// 无对端、对端已关闭或队列不可写时静默丢弃,不向发送方回错
    pub async fn relay(&self, id: ConnectionId, payload: RelayPayload) -> bool {
        let inner = self.inner.lock().await;
        let Some(peer) = inner.peers.get(&id) else {
            return false;
        };
        let Some(partner_id) = peer.partner else {
            debug!(connection_id = %id, "relay dropped, no partner");
            return false;
        };
        match inner.peers.get(&partner_id) {
            Some(partner) if partner.state == ConnectionState::Paired => partner
                .sender
                .send(OutboundFrame::Relay(payload))
                .is_ok(),
            _ => false,
        }
    }

    /// 拆除连接
    ///
    /// 传输关闭、显式断开和探测失败共用此路径;重复调用是空操作。
    /// 存活对端会收到一次 `partner_disconnected` 并清除 partner 指针,
    /// 默认不自动重新入队
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(mut peer) = inner.peers.remove(&id) else {
            return false;
        };
        peer.state = ConnectionState::Closed;
        let session_secs = Utc::now()
            .signed_duration_since(peer.connected_at)
            .num_seconds();
        if inner.waiting == Some(id) {
            inner.waiting = None;
        }
        let _ = peer.sender.send(OutboundFrame::Shutdown);

        if let Some(partner_id) = peer.partner {
            let mut requeue = false;
            if let Some(partner) = inner.peers.get_mut(&partner_id) {
                partner.partner = None;
                let _ = partner
                    .sender
                    .send(OutboundFrame::Event(ServerEvent::PartnerDisconnected));
                requeue = self.auto_requeue && partner.is_open();
            }
            info!(connection_id = %id, partner_id = %partner_id, session_secs, "pair dissolved");
            if requeue {
                inner.matchmake(partner_id);
            }
        } else {
            info!(connection_id = %id, session_secs, "connection closed");
        }
        true
    }

    /// 收到 Pong,恢复存活标记
    pub async fn mark_alive(&self, id: ConnectionId) {
        if let Some(peer) = self.inner.lock().await.peers.get_mut(&id) {
            peer.alive = true;
        }
    }

    /// 存活探测一轮
    ///
    /// 上一轮未应答的连接被强制拆除,其余连接清除存活标记并入队探测帧。
    /// 返回本轮拆除的连接数
    pub async fn sweep(&self) -> usize {
        let stale = {
            let mut inner = self.inner.lock().await;
            let mut stale = Vec::new();
            for (id, peer) in inner.peers.iter_mut() {
                if peer.alive {
                    peer.alive = false;
                    let _ = peer.sender.send(OutboundFrame::Probe);
                } else {
                    stale.push(*id);
                }
            }
            stale
        };

        for id in &stale {
            warn!(connection_id = %id, "liveness probe failed, forcing close");
            self.disconnect(*id).await;
        }
        stale.len()
    }

    /// 当前计数快照
    pub async fn counts(&self) -> RegistryCounts {
        let inner = self.inner.lock().await;
        let linked = inner
            .peers
            .values()
            .filter(|peer| peer.partner.is_some())
            .count();
        RegistryCounts {
            connections: inner.peers.len(),
            pairs: linked / 2,
            waiting: inner.waiting.is_some(),
        }
    }

    #[cfg(test)]
    async fn waiting_occupant(&self) -> Option<ConnectionId> {
        self.inner.lock().await.waiting
    }

    #[cfg(test)]
    async fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        self.inner.lock().await.peers.get(&id).and_then(|p| p.partner)
    }

    #[cfg(test)]
    async fn state_of(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.inner.lock().await.peers.get(&id).map(|p| p.state)
    }
}
