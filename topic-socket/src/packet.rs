//! 数据包编解码
//!
//! 线上格式为 `{"t": <类型码>, "d": <数据>}`，订阅相关的数据包都在 `d.topic` 中携带主题

use crate::ack::AckId;
use crate::error::SocketError;
use crate::events::EventPayload;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// 数据包类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PacketType {
    Open = 0,
    Join = 1,
    Leave = 2,
    JoinAck = 3,
    JoinError = 4,
    LeaveAck = 5,
    LeaveError = 6,
    Event = 7,
    Ping = 8,
    Pong = 9,
}

impl PacketType {
    /// 是否必须携带主题
    pub fn has_topic(&self) -> bool {
        !matches!(self, PacketType::Open | PacketType::Ping | PacketType::Pong)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => PacketType::Open,
            1 => PacketType::Join,
            2 => PacketType::Leave,
            3 => PacketType::JoinAck,
            4 => PacketType::JoinError,
            5 => PacketType::LeaveAck,
            6 => PacketType::LeaveError,
            7 => PacketType::Event,
            8 => PacketType::Ping,
            9 => PacketType::Pong,
            other => return Err(format!("unknown packet type {}", other)),
        })
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> Self {
        t as u8
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 数据包
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub t: PacketType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub d: Value,
}

impl Packet {
    pub fn new(t: PacketType, d: Value) -> Self {
        Self { t, d }
    }

    // ==================== Client → Server ====================

    pub fn join(topic: &str) -> Self {
        Self::new(PacketType::Join, json!({ "topic": topic }))
    }

    /// 关闭订阅请求
    pub fn leave(topic: &str) -> Self {
        Self::new(PacketType::Leave, json!({ "topic": topic }))
    }

    /// 主题事件，带 ack 时附加 `id`
    pub fn event(topic: &str, event: &str, data: Value, id: Option<AckId>) -> Self {
        let payload = EventPayload {
            topic: topic.to_string(),
            event: event.to_string(),
            data,
            id,
        };
        // EventPayload 只包含 String / Value / u64，序列化不会失败
        let d = serde_json::to_value(payload).unwrap_or(Value::Null);
        Self::new(PacketType::Event, d)
    }

    pub fn ping() -> Self {
        Self::new(PacketType::Ping, Value::Null)
    }

    pub fn pong() -> Self {
        Self::new(PacketType::Pong, Value::Null)
    }

    // ==================== Server → Client ====================

    pub fn join_ack(topic: &str) -> Self {
        Self::new(PacketType::JoinAck, json!({ "topic": topic }))
    }

    pub fn join_error(topic: &str, message: &str) -> Self {
        Self::new(
            PacketType::JoinError,
            json!({ "topic": topic, "message": message }),
        )
    }

    pub fn leave_ack(topic: &str) -> Self {
        Self::new(PacketType::LeaveAck, json!({ "topic": topic }))
    }

    pub fn leave_error(topic: &str, message: &str) -> Self {
        Self::new(
            PacketType::LeaveError,
            json!({ "topic": topic, "message": message }),
        )
    }

    // ==================== 访问 / 编解码 ====================

    pub fn topic(&self) -> Option<&str> {
        self.d.get("topic").and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Result<String, SocketError> {
        Ok(serde_json::to_string(self)?)
    }

    /// 解析并校验数据包
    pub fn from_json(raw: &str) -> Result<Self, SocketError> {
        let packet: Packet = serde_json::from_str(raw)?;
        packet.validate()?;
        Ok(packet)
    }

    pub fn validate(&self) -> Result<(), SocketError> {
        if self.t.has_topic() && self.topic().map_or(true, str::is_empty) {
            return Err(SocketError::InvalidPacket(format!(
                "{} packet is missing a topic",
                self.t
            )));
        }
        if self.t == PacketType::Event && self.d.get("event").and_then(Value::as_str).is_none() {
            return Err(SocketError::InvalidPacket(
                "Event packet is missing an event name".into(),
            ));
        }
        Ok(())
    }
}
