//! 混合模式监听
//!
//! 同一个 TCP 监听端口同时服务:
//! - 配置路径上的 WebSocket 升级(信令长连接)
//! - `GET /api/health` 进程健康上报
//! - `GET /metrics` Prometheus 指标导出
//!
//! 做法是先读取请求头窥探协议,再把已读字节回放给
//! WebSocket 握手或直接写回普通 HTTP 响应。

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;

use tether_signaling_common::{SignalingError, SignalingResult};

use crate::interface::connection::{ConnectionListener, GatewayListener, handle_connection};
use crate::metrics::SignalingGatewayMetrics;

/// 请求头读取上限,超出按恶意请求拒绝
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HTTP_HEADER_END: &[u8] = b"\r\n\r\n";

/// 接入上下文
pub struct AcceptContext {
    pub listener: Arc<GatewayListener>,
    pub ws_path: String,
    pub max_message_bytes: usize,
}

/// 窥探结果
#[derive(Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// 头部尚未读完
    NeedMore,
    /// 配置路径上的 WebSocket 升级请求
    WsUpgrade,
    /// 进程健康上报
    Health,
    /// 指标导出
    Metrics,
    /// 其他路径
    NotFound,
    /// 不是可识别的 HTTP 请求
    BadRequest,
}

/// 窥探已缓冲的请求头,判定这条连接的去向
pub fn inspect(buf: &[u8], ws_path: &str) -> RequestKind {
    let Some(header_end) = find_header_end(buf) else {
        return RequestKind::NeedMore;
    };
    let Ok(header_str) = std::str::from_utf8(&buf[..header_end]) else {
        return RequestKind::BadRequest;
    };

    let mut lines = header_str.split("\r\n");
    let Some(request_line) = lines.next() else {
        return RequestKind::BadRequest;
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return RequestKind::BadRequest;
    }
    if method != "GET" {
        return RequestKind::NotFound;
    }

    let mut upgrade = false;
    let mut connection_upgrade = false;
    let mut ws_key = false;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim().to_ascii_lowercase();
            match name.as_str() {
                "upgrade" => upgrade = value.contains("websocket"),
                "connection" => connection_upgrade = value.contains("upgrade"),
                "sec-websocket-key" => ws_key = !value.is_empty(),
                _ => {}
            }
        }
    }

    let path_only = path.split('?').next().unwrap_or("");
    if upgrade && connection_upgrade && ws_key {
        if path_only == ws_path {
            return RequestKind::WsUpgrade;
        }
        return RequestKind::NotFound;
    }

    match path_only {
        "/api/health" => RequestKind::Health,
        "/metrics" => RequestKind::Metrics,
        _ => RequestKind::NotFound,
    }
}

/// 服务一条新接入的 TCP 连接
///
/// 任何失败只影响这条连接本身,调用方记录后继续接受新连接
pub async fn serve_connection<S>(mut stream: S, ctx: Arc<AcceptContext>) -> SignalingResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut head = BytesMut::with_capacity(2048);
    let kind = loop {
        match inspect(&head, &ctx.ws_path) {
            RequestKind::NeedMore => {
                if head.len() >= MAX_HEADER_BYTES {
                    break RequestKind::BadRequest;
                }
                let read = stream.read_buf(&mut head).await?;
                if read == 0 {
                    // 头部读完之前对端就关闭了
                    return Ok(());
                }
            }
            kind => break kind,
        }
    };

    match kind {
        RequestKind::WsUpgrade => {
            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(ctx.max_message_bytes);
            ws_config.max_frame_size = Some(ctx.max_message_bytes);
            let rewound = RewindStream::new(head.freeze(), stream);
            let ws = accept_async_with_config(rewound, Some(ws_config))
                .await
                .map_err(|e| {
                    SignalingError::Transport(format!("websocket handshake failed: {}", e))
                })?;
            debug!("websocket upgrade accepted");
            let listener: Arc<dyn ConnectionListener> = ctx.listener.clone();
            handle_connection(ws, listener).await;
            Ok(())
        }
        RequestKind::Health => {
            let body = ctx.listener.health_snapshot().await.to_string();
            write_response(&mut stream, "200 OK", "application/json", &body).await
        }
        RequestKind::Metrics => {
            let body = SignalingGatewayMetrics::gather_text();
            write_response(&mut stream, "200 OK", "text/plain; version=0.0.4", &body).await
        }
        RequestKind::NotFound => {
            write_response(&mut stream, "404 Not Found", "text/plain", "not found").await
        }
        RequestKind::BadRequest | RequestKind::NeedMore => {
            write_response(&mut stream, "400 Bad Request", "text/plain", "bad request").await
        }
    }
}

async fn write_response<S>(
    stream: &mut S,
    status: &str,
    content_type: &str,
    body: &str,
) -> SignalingResult<()>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HTTP_HEADER_END.len())
        .position(|w| w == HTTP_HEADER_END)
        .map(|idx| idx + HTTP_HEADER_END.len())
}

/// 把已窥探的头部字节回放到流前面
///
/// WebSocket 握手需要完整读一遍请求,窥探消耗的字节通过它补回
pub struct RewindStream<S> {
    head: Bytes,
    pos: usize,
    inner: S,
}

impl<S> RewindStream<S> {
    pub fn new(head: Bytes, inner: S) -> Self {
        Self {
            head,
            pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RewindStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.pos < self.head.len() {
            let remaining = &self.head[self.pos..];
            let to_copy = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            self.pos += to_copy;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RewindStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
