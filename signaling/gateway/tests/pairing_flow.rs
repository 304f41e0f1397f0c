//! 端到端场景测试
//!
//! 启动真实网关,用真实 WebSocket 客户端走完匹配、转发、
//! 拆除和探测淘汰的完整链路

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tether_signaling_gateway::GatewayConfig;
use tether_signaling_gateway::service::{GatewayHandle, start_gateway, wire};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

async fn start_test_gateway(probe_interval_secs: u64, auto_requeue: bool) -> (GatewayHandle, String) {
    let mut config = GatewayConfig::default();
    config.server.address = "127.0.0.1".to_string();
    config.server.port = 0;
    config.liveness.probe_interval_secs = probe_interval_secs;
    config.matchmaking.auto_requeue = auto_requeue;

    let context = wire::initialize(config);
    let handle = start_gateway(&context).await.expect("gateway should start");
    let url = format!("ws://{}/ws", handle.local_addr());
    (handle, url)
}

async fn connect(url: &str) -> WsClient {
    let (client, _response) = timeout(RECV_TIMEOUT, connect_async(url))
        .await
        .expect("connect should not time out")
        .expect("websocket handshake should succeed");
    client
}

/// 读取下一条文本帧并解析信封,跳过控制帧
async fn recv_json(client: &mut WsClient) -> Value {
    loop {
        let message = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("recv should not time out")
            .expect("stream should not end")
            .expect("frame should be readable");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).expect("valid json frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// 读取下一条原始文本帧,不做任何解析
async fn recv_text(client: &mut WsClient) -> String {
    loop {
        let message = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("recv should not time out")
            .expect("stream should not end")
            .expect("frame should be readable");
        match message {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn recv_event(client: &mut WsClient) -> String {
    let value = recv_json(client).await;
    value["type"].as_str().expect("type field").to_string()
}

#[tokio::test]
async fn scenario_first_waits_then_both_match() {
    let (_gateway, url) = start_test_gateway(30, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");

    let mut y = connect(&url).await;
    assert_eq!(recv_event(&mut y).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");
}

#[tokio::test]
async fn scenario_offer_is_relayed_verbatim() {
    let (_gateway, url) = start_test_gateway(30, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");
    let mut y = connect(&url).await;
    assert_eq!(recv_event(&mut y).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");

    let offer = r#"{"type":"offer","offer":{"sdp":"v=0 o=- 42","kind":"video"}}"#;
    x.send(Message::Text(offer.to_string())).await.unwrap();

    // 对端收到的文本与发送方完全一致,不经过任何转换
    let received = recv_text(&mut y).await;
    assert_eq!(received, offer);

    // 二进制帧同样原样透传
    y.send(Message::Binary(vec![0x01, 0x02, 0x03])).await.unwrap();
    loop {
        let message = timeout(RECV_TIMEOUT, x.next())
            .await
            .expect("recv should not time out")
            .expect("stream should not end")
            .expect("frame should be readable");
        match message {
            Message::Binary(data) => {
                assert_eq!(data, vec![0x01, 0x02, 0x03]);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn scenario_relay_preserves_sender_order() {
    let (_gateway, url) = start_test_gateway(30, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");
    let mut y = connect(&url).await;
    assert_eq!(recv_event(&mut y).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");

    for i in 0..20 {
        let frame = format!(r#"{{"type":"chat","seq":{}}}"#, i);
        x.send(Message::Text(frame)).await.unwrap();
    }
    for i in 0..20 {
        let value = recv_json(&mut y).await;
        assert_eq!(value["seq"], Value::from(i));
    }
}

#[tokio::test]
async fn scenario_partner_close_notifies_survivor_and_keeps_slot() {
    let (_gateway, url) = start_test_gateway(30, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");
    let mut y = connect(&url).await;
    assert_eq!(recv_event(&mut y).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");

    // z 独立占用等待槽
    let mut z = connect(&url).await;
    assert_eq!(recv_event(&mut z).await, "waiting");

    y.close(None).await.unwrap();
    assert_eq!(recv_event(&mut x).await, "partner_disconnected");

    // 等待槽不受 x/y 拆除影响:新来者与 z 配对
    let mut w = connect(&url).await;
    assert_eq!(recv_event(&mut w).await, "match");
    assert_eq!(recv_event(&mut z).await, "match");
}

#[tokio::test]
async fn scenario_ghost_in_waiting_slot_is_not_matched() {
    let (_gateway, url) = start_test_gateway(30, false).await;

    let mut z = connect(&url).await;
    assert_eq!(recv_event(&mut z).await, "waiting");
    z.close(None).await.unwrap();
    drop(z);

    // 给网关一点时间走完拆除
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut w = connect(&url).await;
    assert_eq!(recv_event(&mut w).await, "waiting");
}

#[tokio::test]
async fn scenario_explicit_disconnect_message_tears_down_pair() {
    let (_gateway, url) = start_test_gateway(30, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");
    let mut y = connect(&url).await;
    assert_eq!(recv_event(&mut y).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");

    y.send(Message::Text(r#"{"type":"disconnect"}"#.to_string()))
        .await
        .unwrap();

    assert_eq!(recv_event(&mut x).await, "partner_disconnected");
}

#[tokio::test]
async fn scenario_unresponsive_peer_is_reaped_by_probes() {
    // 1 秒探测周期:两轮未应答后强制关闭
    let (_gateway, url) = start_test_gateway(1, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");
    let mut y = connect(&url).await;
    assert_eq!(recv_event(&mut y).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");

    // y 从此不再轮询自身的流,Ping 得不到 Pong 应答;
    // x 持续轮询,由客户端协议栈自动应答探测
    drop(tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(y);
    }));

    assert_eq!(recv_event(&mut x).await, "partner_disconnected");
}

#[tokio::test]
async fn scenario_auto_requeue_puts_survivor_back_in_slot() {
    let (_gateway, url) = start_test_gateway(30, true).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");
    let mut y = connect(&url).await;
    assert_eq!(recv_event(&mut y).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");

    y.close(None).await.unwrap();
    assert_eq!(recv_event(&mut x).await, "partner_disconnected");
    assert_eq!(recv_event(&mut x).await, "waiting");

    let mut w = connect(&url).await;
    assert_eq!(recv_event(&mut w).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");
}

#[tokio::test]
async fn scenario_message_while_waiting_is_dropped_silently() {
    let (_gateway, url) = start_test_gateway(30, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");
    x.send(Message::Text(r#"{"type":"offer"}"#.to_string()))
        .await
        .unwrap();
    // 确保网关在配对发生前已经处理并丢弃这条消息
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 没有对端,消息被丢弃且连接保持打开;后续匹配照常进行
    let mut y = connect(&url).await;
    assert_eq!(recv_event(&mut y).await, "match");
    assert_eq!(recv_event(&mut x).await, "match");
    // y 不应收到 x 等待期间发出的消息
    y.send(Message::Text(r#"{"type":"chat","text":"hi"}"#.to_string()))
        .await
        .unwrap();
    let value = recv_json(&mut x).await;
    assert_eq!(value["type"], "chat");
}

#[tokio::test]
async fn health_endpoint_reports_process_liveness() {
    let (gateway, url) = start_test_gateway(30, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");

    let mut stream = TcpStream::connect(gateway.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /api/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains(r#""status":"ok""#));
    assert!(response.contains(r#""connections":1"#));
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let (gateway, url) = start_test_gateway(30, false).await;

    let mut x = connect(&url).await;
    assert_eq!(recv_event(&mut x).await, "waiting");

    let mut stream = TcpStream::connect(gateway.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("signaling_connections_active"));
}

#[tokio::test]
async fn unknown_http_path_returns_not_found() {
    let (gateway, _url) = start_test_gateway(30, false).await;

    let mut stream = TcpStream::connect(gateway.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 404 Not Found"));
}
