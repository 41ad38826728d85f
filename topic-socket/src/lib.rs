//! 主题订阅客户端
//!
//! 多个主题订阅复用一条共享连接，每个订阅独立打开、关闭、收发事件和 ack

mod ack;
mod buffer;
mod connection;
mod emitter;
mod error;
mod events;
mod packet;
mod socket;
mod state;

pub use ack::{AckCallback, AckCompletion, AckId, AckRegistry, AckResult};
pub use buffer::{BufferedEmit, EmitBuffer};
pub use connection::{ChannelConnection, Connection};
pub use emitter::{listener, Emitter, EventBus, Listener, ListenerError, ListenerId};
pub use error::SocketError;
pub use events::{
    // 数据结构
    CloseData, EventPayload, ServerAckData, ServerAckErrorData, ServerEventData,
    // 事件名
    ACK_ERROR_EVENT, ACK_EVENT, CLOSE_EVENT, ERROR_EVENT, LEAVE_ERROR_EVENT, READY_EVENT,
};
pub use packet::{Packet, PacketType};
pub use socket::{Socket, SocketConfig};
pub use state::SocketState;
