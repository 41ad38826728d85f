//! 共享连接
//!
//! 多个订阅复用同一条物理连接，订阅只调用它的发送方法

use crate::ack::AckId;
use crate::error::SocketError;
use crate::packet::Packet;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// 共享连接能力
///
/// 实现方不得在发送过程中同步回调订阅，订阅持有内部锁调用这两个方法。
pub trait Connection: Send + Sync {
    /// 发送主题事件，带 ack 时附加 ID
    fn send_event(
        &self,
        topic: &str,
        event: &str,
        data: Value,
        ack_id: Option<AckId>,
    ) -> Result<(), SocketError>;

    /// 发送已构建好的控制包
    fn send_packet(&self, packet: Packet) -> Result<(), SocketError>;
}

/// 基于 mpsc channel 的连接
///
/// 发送端只负责入队，真正写 socket 的是持有接收端的传输任务。
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<Packet>,
}

impl ChannelConnection {
    pub fn new(tx: mpsc::UnboundedSender<Packet>) -> Self {
        Self { tx }
    }

    /// 创建连接以及对应的出站数据包接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Connection for ChannelConnection {
    fn send_event(
        &self,
        topic: &str,
        event: &str,
        data: Value,
        ack_id: Option<AckId>,
    ) -> Result<(), SocketError> {
        self.send_packet(Packet::event(topic, event, data, ack_id))
    }

    fn send_packet(&self, packet: Packet) -> Result<(), SocketError> {
        debug!("Queueing {} packet", packet.t);
        self.tx.send(packet).map_err(|_| SocketError::NotConnected)
    }
}
