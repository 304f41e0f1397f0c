//! 连接处理器模块
//!
//! 处理客户端长连接的消息接收和推送
//!
//! 接口层职责(协议适配):
//! - 驱动 WebSocket 读写,转换传输帧和领域负载
//! - 识别显式断开控制消息,其余内容不做任何解析
//! - 委托匹配、转发与拆除到配对注册表

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use tether_signaling_common::{ClientControl, RelayPayload, protocol};

use crate::domain::model::{ConnectionId, OutboundFrame};
use crate::domain::service::{MatchOutcome, PairRegistry};
use crate::metrics::SignalingGatewayMetrics;

/// 长连接事件监听器
///
/// 传输泵只依赖这个接口,不接触注册表内部
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    async fn on_connect(
        &self,
        sender: UnboundedSender<OutboundFrame>,
    ) -> (ConnectionId, MatchOutcome);

    async fn on_message(&self, connection_id: ConnectionId, payload: RelayPayload);

    async fn on_pong(&self, connection_id: ConnectionId);

    async fn on_disconnect(&self, connection_id: ConnectionId);
}

/// 网关监听器
///
/// `ConnectionListener` 的生产实现,同时为 HTTP 接口提供健康快照
pub struct GatewayListener {
    registry: Arc<PairRegistry>,
    metrics: Arc<SignalingGatewayMetrics>,
    started_at: DateTime<Utc>,
}

impl GatewayListener {
    pub fn new(registry: Arc<PairRegistry>, metrics: Arc<SignalingGatewayMetrics>) -> Self {
        Self {
            registry,
            metrics,
            started_at: Utc::now(),
        }
    }

    async fn sync_gauges(&self) {
        let counts = self.registry.counts().await;
        self.metrics.sync_counts(counts);
    }

    /// 进程健康快照,由 `/api/health` 返回
    ///
    /// 这里是进程级存活上报,与单个连接的探测无关
    pub async fn health_snapshot(&self) -> serde_json::Value {
        let counts = self.registry.counts().await;
        let uptime = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(0);
        serde_json::json!({
            "status": "ok",
            "connections": counts.connections,
            "pairs": counts.pairs,
            "waiting": counts.waiting,
            "uptime_seconds": uptime,
        })
    }
}

#[async_trait]
impl ConnectionListener for GatewayListener {
    async fn on_connect(
        &self,
        sender: UnboundedSender<OutboundFrame>,
    ) -> (ConnectionId, MatchOutcome) {
        let (connection_id, outcome) = self.registry.attach(sender).await;
        if matches!(outcome, MatchOutcome::Paired(_)) {
            self.metrics.pairs_formed_total.inc();
        }
        self.sync_gauges().await;
        (connection_id, outcome)
    }

    async fn on_message(&self, connection_id: ConnectionId, payload: RelayPayload) {
        // 唯一被消费的上行控制类型;其余负载原样转发
        if let RelayPayload::Text(text) = &payload {
            if let Some(ClientControl::Disconnect) = protocol::parse_control(text) {
                debug!(%connection_id, "explicit disconnect received");
                if self.registry.disconnect(connection_id).await {
                    self.metrics.teardowns_total.inc();
                    self.sync_gauges().await;
                }
                return;
            }
        }
        if self.registry.relay(connection_id, payload).await {
            self.metrics.messages_relayed_total.inc();
        }
    }

    async fn on_pong(&self, connection_id: ConnectionId) {
        self.registry.mark_alive(connection_id).await;
    }

    async fn on_disconnect(&self, connection_id: ConnectionId) {
        if self.registry.disconnect(connection_id).await {
            self.metrics.teardowns_total.inc();
        }
        self.sync_gauges().await;
    }
}

/// 驱动一条已完成握手的长连接直到关闭
///
/// 单任务同时服务读写两个方向:下行队列里的帧写入传输,
/// 上行帧交给监听器;任一方向出错即退出并触发拆除。
/// 退出时队列接收端随任务销毁,悬挂中的下行推送自然作废
pub async fn handle_connection<S>(ws: WebSocketStream<S>, listener: Arc<dyn ConnectionListener>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (connection_id, _outcome) = listener.on_connect(outbound_tx).await;
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(OutboundFrame::Event(event)) => {
                    if sink.send(Message::Text(event.to_frame())).await.is_err() {
                        break;
                    }
                }
                Some(OutboundFrame::Relay(RelayPayload::Text(text))) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(OutboundFrame::Relay(RelayPayload::Binary(data))) => {
                    if sink.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Some(OutboundFrame::Probe) => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                Some(OutboundFrame::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    listener.on_message(connection_id, RelayPayload::Text(text)).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    listener.on_message(connection_id, RelayPayload::Binary(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    listener.on_pong(connection_id).await;
                }
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite 在下一次读写时自动应答 Pong
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(err)) => {
                    // 传输错误等同于对端断开
                    warn!(%connection_id, error = %err, "transport error, closing connection");
                    break;
                }
            },
        }
    }

    listener.on_disconnect(connection_id).await;
}
