//! 订阅事件定义
//!
//! 定义应用层监听的事件名，以及服务器下发给订阅的数据结构

use crate::ack::AckId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==================== 应用层事件名 ====================

/// 订阅被服务器确认
pub const READY_EVENT: &str = "ready";

/// 订阅被服务器拒绝
pub const ERROR_EVENT: &str = "error";

/// 服务器拒绝关闭订阅
pub const LEAVE_ERROR_EVENT: &str = "leaveError";

/// 订阅已销毁
pub const CLOSE_EVENT: &str = "close";

// ==================== 保留事件名（Server → Client） ====================

/// 服务器确认某个带 ack 的事件
pub const ACK_EVENT: &str = "ack";

/// 服务器以错误确认某个带 ack 的事件
pub const ACK_ERROR_EVENT: &str = "ackError";

// ==================== 数据结构 ====================

/// 上行事件（Client → Server）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AckId>,
}

/// 服务器推送的普通事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEventData {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// 服务器 ack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAckData {
    pub id: AckId,
    #[serde(default)]
    pub data: Value,
}

/// 服务器 ack 错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAckErrorData {
    pub id: AckId,
    pub message: String,
}

/// `close` 事件携带的数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseData {
    pub topic: String,
    pub state: crate::state::SocketState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_payload_omits_missing_id() {
        let payload = EventPayload {
            topic: "chat".into(),
            event: "msg".into(),
            data: json!("a"),
            id: None,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"topic": "chat", "event": "msg", "data": "a"})
        );
    }

    #[test]
    fn test_ack_data_defaults() {
        let ack: ServerAckData = serde_json::from_value(json!({"id": 3})).unwrap();
        assert_eq!(ack.id, 3);
        assert_eq!(ack.data, Value::Null);

        assert!(serde_json::from_value::<ServerAckErrorData>(json!({"id": 3})).is_err());
    }
}
