//! Socket 错误定义

use crate::state::SocketState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("{0} is not a valid socket state")]
    InvalidState(String),

    #[error("Cannot move {topic} subscription from {from} to {to}")]
    InvalidTransition {
        topic: String,
        from: SocketState,
        to: SocketState,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Ack timeout")]
    AckTimeout,

    #[error("{0}")]
    AckRejected(String),

    #[error("Ack abandoned, subscription closed before server replied")]
    AckAbandoned,

    #[error("Packet for topic {received} routed to {expected} subscription")]
    TopicMismatch { expected: String, received: String },

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
