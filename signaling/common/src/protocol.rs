//! 线上协议信封
//!
//! 职责:定义网关与客户端之间的控制消息
//!
//! 设计要点:
//! - 信封是 UTF-8 文本帧中的 JSON 对象,至少携带一个 `type` 字段
//! - 网关只消费极少数控制类型,其余消息原样转发,内容完全不透明
//! - 存活探测使用传输层原生 Ping/Pong 控制帧,不走 JSON 信封

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// 服务端下行控制事件
///
/// 线上格式形如 `{"type":"waiting"}`,由 `type` 字段区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// 连接进入等待槽
    Waiting,
    /// 配对成功,发给配对双方
    Match,
    /// 对端断开,发给存活一方
    PartnerDisconnected,
}

impl ServerEvent {
    /// 序列化为下行文本帧
    pub fn to_frame(&self) -> String {
        // 单字段无负载枚举,序列化不会失败
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 客户端上行控制消息
///
/// 网关唯一主动消费的上行类型;其余 `type` 一律原样转发给对端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientControl {
    /// 显式断开,触发拆除流程
    Disconnect,
}

/// 透传消息负载
///
/// 转发路径不解析内容,文本与二进制帧都按原样送达对端
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl RelayPayload {
    pub fn len(&self) -> usize {
        match self {
            RelayPayload::Text(text) => text.len(),
            RelayPayload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type", borrow)]
    kind: Cow<'a, str>,
}

/// 尝试从上行文本帧中识别控制消息
///
/// 无法解析或类型未知时返回 `None`,调用方按不透明负载继续转发
pub fn parse_control(text: &str) -> Option<ClientControl> {
    let envelope: Envelope<'_> = serde_json::from_str(text).ok()?;
    match envelope.kind.as_ref() {
        "disconnect" => Some(ClientControl::Disconnect),
        _ => None,
    }
}
