//! 单个主题订阅
//!
//! 每个 [`Socket`] 对应共享连接上的一个主题。生命周期：
//! `pending → open → closing → closed`，服务器拒绝或连接出错时进入 `error`。
//!
//! - 订阅确认前的 `emit` 先进入发送缓冲，确认后按原顺序补发
//! - 带回调的 `emit` 分配 ack ID，服务器回 ack 时调用回调
//! - 订阅销毁（teardown）时先发布 `close` 事件，再无条件清空缓冲、监听器和 ack 注册表

use crate::ack::{AckCallback, AckId, AckRegistry, AckResult};
use crate::buffer::EmitBuffer;
use crate::connection::Connection;
use crate::emitter::{listener, Emitter, EventBus, ListenerError, ListenerId};
use crate::error::SocketError;
use crate::events::*;
use crate::packet::{Packet, PacketType};
use crate::state::SocketState;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// 订阅配置
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// 是否输出诊断日志（未知 ack、缓冲补发等）
    pub diagnostics: bool,
    /// `emit_with_ack` 的等待上限，`None` 表示一直等待
    pub ack_timeout: Option<Duration>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        // 从环境变量读取配置，production 环境关闭诊断日志
        let diagnostics = std::env::var("TOPIC_SOCKET_ENV")
            .map(|v| v != "production")
            .unwrap_or(true);
        let ack_timeout = std::env::var("TOPIC_SOCKET_ACK_TIMEOUT_MS")
            .ok()
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis);

        Self {
            diagnostics,
            ack_timeout,
        }
    }
}

/// 受锁保护的订阅状态
struct Inner {
    state: SocketState,
    buffer: EmitBuffer,
    acks: AckRegistry,
    /// `close` 发布完成的信号，第一次 teardown 时创建，之后的 teardown 共享等待
    close_done: Option<Shared<BoxFuture<'static, ()>>>,
}

/// 主题订阅
pub struct Socket {
    topic: String,
    config: SocketConfig,
    connection: Arc<dyn Connection>,
    emitter: Arc<dyn EventBus>,
    inner: Mutex<Inner>,
}

impl Socket {
    /// 创建订阅（join 请求已由连接层发出）
    pub fn new(topic: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        Self::with_config(topic, connection, SocketConfig::default())
    }

    pub fn with_config(
        topic: impl Into<String>,
        connection: Arc<dyn Connection>,
        config: SocketConfig,
    ) -> Self {
        Self::with_event_bus(topic, connection, config, Arc::new(Emitter::new()))
    }

    /// 使用自定义事件总线
    pub fn with_event_bus(
        topic: impl Into<String>,
        connection: Arc<dyn Connection>,
        config: SocketConfig,
        emitter: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            topic: topic.into(),
            config,
            connection,
            emitter,
            inner: Mutex::new(Inner {
                state: SocketState::Pending,
                buffer: EmitBuffer::new(),
                acks: AckRegistry::new(),
                close_done: None,
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 当前状态
    pub fn state(&self) -> SocketState {
        self.lock().state
    }

    /// 缓冲中的事件数
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// 等待 ack 的事件数
    pub fn pending_acks(&self) -> usize {
        self.lock().acks.len()
    }

    /// 下一个 ack ID
    pub fn next_ack_id(&self) -> AckId {
        self.lock().acks.next_id()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // 锁内只有同步的状态修改，中毒后状态依旧可用
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 状态迁移，非法迁移直接返回错误
    fn transition(&self, inner: &mut Inner, to: SocketState) -> Result<(), SocketError> {
        if !inner.state.can_transition_to(to) {
            return Err(SocketError::InvalidTransition {
                topic: self.topic.clone(),
                from: inner.state,
                to,
            });
        }
        debug!("[Socket] {} topic: {} -> {}", self.topic, inner.state, to);
        inner.state = to;
        Ok(())
    }

    // ==================== 应用层接口 ====================

    /// 发送事件
    pub fn emit(&self, event: impl Into<String>, data: Value) -> Result<(), SocketError> {
        let mut inner = self.lock();
        self.dispatch(&mut inner, event.into(), data, None)
    }

    /// 发送事件，服务器确认后调用回调
    pub fn emit_with_callback<F>(
        &self,
        event: impl Into<String>,
        data: Value,
        ack: F,
    ) -> Result<(), SocketError>
    where
        F: FnOnce(AckResult) + Send + 'static,
    {
        let mut inner = self.lock();
        self.dispatch(&mut inner, event.into(), data, Some(Box::new(ack)))
    }

    /// 发送事件并等待 Ack
    pub async fn emit_with_ack(
        &self,
        event: impl Into<String>,
        data: Value,
    ) -> Result<Value, SocketError> {
        let (tx, rx) = oneshot::channel::<AckResult>();
        self.emit_with_callback(event, data, move |result| {
            let _ = tx.send(result);
        })?;

        // sender 被丢弃说明订阅已销毁，回调不会再被调用
        let received = match self.config.ack_timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx)
                .await
                .map_err(|_| SocketError::AckTimeout)?,
            None => rx.await,
        };
        received.map_err(|_| SocketError::AckAbandoned)?
    }

    /// 缓冲或发送一条事件
    ///
    /// 实时发送和确认后的缓冲补发都走这里。
    fn dispatch(
        &self,
        inner: &mut Inner,
        event: String,
        data: Value,
        ack: Option<AckCallback>,
    ) -> Result<(), SocketError> {
        if inner.state == SocketState::Pending {
            inner.buffer.push(event, data, ack);
            return Ok(());
        }

        let id = ack.map(|callback| inner.acks.register(callback));
        if let Err(e) = self.connection.send_event(&self.topic, &event, data, id) {
            if let Some(id) = id {
                inner.acks.discard(id);
            }
            return Err(e);
        }
        Ok(())
    }

    /// 请求服务器关闭订阅
    pub fn close(&self) -> Result<(), SocketError> {
        let mut inner = self.lock();
        if inner.state != SocketState::Open {
            return Err(SocketError::InvalidTransition {
                topic: self.topic.clone(),
                from: inner.state,
                to: SocketState::Closing,
            });
        }
        self.transition(&mut inner, SocketState::Closing)?;

        if self.config.diagnostics {
            debug!("[Socket] Closing subscription for {} topic with server", self.topic);
        }

        if let Err(e) = self.connection.send_packet(Packet::leave(&self.topic)) {
            inner.state = SocketState::Open;
            return Err(e);
        }
        Ok(())
    }

    /// 强制终止订阅，不经过服务器
    pub async fn terminate(&self) {
        {
            let mut inner = self.lock();
            // 任意状态都可以进入 closed
            inner.state = SocketState::Closed;
        }
        info!("[Socket] Terminated subscription for {} topic", self.topic);
        self.teardown().await;
    }

    pub fn on<F, Fut>(&self, event: &str, f: F) -> ListenerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.emitter.on(event, listener(f))
    }

    pub fn once<F, Fut>(&self, event: &str, f: F) -> ListenerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.emitter.once(event, listener(f))
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.emitter.off(event, id)
    }

    pub fn listener_count(&self, event: Option<&str>) -> usize {
        self.emitter.listener_count(event)
    }

    // ==================== 服务器事件 ====================

    /// 服务器确认订阅
    pub async fn join_ack(&self) {
        {
            let mut inner = self.lock();
            if let Err(e) = self.transition(&mut inner, SocketState::Open) {
                warn!("[Socket] Ignoring join ack: {}", e);
                return;
            }

            if self.config.diagnostics {
                debug!(
                    "[Socket] Clearing emit buffer for {} topic after subscription ack",
                    self.topic
                );
            }

            // 持锁补发，保证缓冲事件先于任何新的 emit
            for buffered in inner.buffer.take_all() {
                if let Err(e) = self.dispatch(&mut inner, buffered.event, buffered.data, buffered.ack)
                {
                    warn!("[Socket] Failed to flush buffered event for {} topic: {}", self.topic, e);
                }
            }
        }

        self.notify(READY_EVENT, json!({ "topic": self.topic })).await;
    }

    /// 服务器拒绝订阅
    pub async fn join_error(&self, payload: Value) {
        {
            let mut inner = self.lock();
            if let Err(e) = self.transition(&mut inner, SocketState::Error) {
                warn!("[Socket] Ignoring join error: {}", e);
                return;
            }
        }
        warn!("[Socket] Subscription to {} topic rejected: {}", self.topic, payload);

        self.notify(ERROR_EVENT, payload).await;
        self.teardown().await;
    }

    /// 服务器确认关闭
    pub async fn leave_ack(&self) {
        {
            let mut inner = self.lock();
            if inner.state != SocketState::Closing {
                warn!(
                    "[Socket] Ignoring leave ack for {} topic in {} state",
                    self.topic, inner.state
                );
                return;
            }
            inner.state = SocketState::Closed;
        }
        self.teardown().await;
    }

    /// 服务器拒绝关闭，状态保持不变
    pub async fn leave_error(&self, payload: Value) {
        {
            let inner = self.lock();
            if inner.state != SocketState::Closing {
                warn!(
                    "[Socket] Ignoring leave error for {} topic in {} state",
                    self.topic, inner.state
                );
                return;
            }
        }
        warn!("[Socket] Server refused to close {} topic: {}", self.topic, payload);
        self.notify(LEAVE_ERROR_EVENT, payload).await;
    }

    /// 连接出错
    pub fn server_error(&self) {
        let mut inner = self.lock();
        if !matches!(inner.state, SocketState::Open | SocketState::Closing) {
            debug!(
                "[Socket] Ignoring connection error for {} topic in {} state",
                self.topic, inner.state
            );
            return;
        }
        inner.state = SocketState::Error;
        warn!("[Socket] Connection error on {} topic", self.topic);
    }

    /// 服务器推送事件，转发给应用层监听器
    pub async fn server_event(&self, message: ServerEventData) -> Result<(), ListenerError> {
        self.emitter.emit(&message.event, message.data).await
    }

    /// 服务器 ack
    pub fn server_ack(&self, ack: ServerAckData) {
        let completion = self.lock().acks.resolve(ack.id, ack.data);
        match completion {
            Some(completion) => completion.complete(),
            None => {
                if self.config.diagnostics {
                    debug!("[Socket] Bad ack {} for {} topic", ack.id, self.topic);
                }
            }
        }
    }

    /// 服务器 ack 错误
    pub fn server_ack_error(&self, ack: ServerAckErrorData) {
        let completion = self.lock().acks.reject(ack.id, ack.message);
        match completion {
            Some(completion) => completion.complete(),
            None => {
                if self.config.diagnostics {
                    debug!("[Socket] Bad error ack {} for {} topic", ack.id, self.topic);
                }
            }
        }
    }

    /// 按数据包类型分发到对应的服务器事件
    pub async fn handle_packet(&self, packet: Packet) -> Result<(), SocketError> {
        if packet.t.has_topic() {
            packet.validate()?;
            if let Some(topic) = packet.topic() {
                if topic != self.topic {
                    return Err(SocketError::TopicMismatch {
                        expected: self.topic.clone(),
                        received: topic.to_string(),
                    });
                }
            }
        }

        match packet.t {
            PacketType::JoinAck => self.join_ack().await,
            PacketType::JoinError => self.join_error(packet.d).await,
            PacketType::LeaveAck => self.leave_ack().await,
            PacketType::LeaveError => self.leave_error(packet.d).await,
            PacketType::Event => {
                let message: ServerEventData = serde_json::from_value(packet.d)?;
                if message.event == ACK_EVENT {
                    self.server_ack(serde_json::from_value(message.data)?);
                } else if message.event == ACK_ERROR_EVENT {
                    self.server_ack_error(serde_json::from_value(message.data)?);
                } else if let Err(e) = self.server_event(message).await {
                    debug!("[Socket] Listener failure on {} topic: {}", self.topic, e);
                }
            }
            other => {
                debug!("[Socket] Ignoring {} packet for {} topic", other, self.topic);
            }
        }
        Ok(())
    }

    // ==================== 内部 ====================

    /// 发布通知，监听器失败只记录日志
    async fn notify(&self, event: &str, data: Value) {
        if let Err(e) = self.emitter.emit(event, data).await {
            debug!("[Socket] {} topic: {}", self.topic, e);
        }
    }

    /// 销毁订阅
    ///
    /// 等待 `close` 监听器全部结束（无论成功、失败还是 panic）之后，
    /// 清空发送缓冲、监听器和 ack 注册表。并发的 teardown 等待同一次 `close` 发布。
    async fn teardown(&self) {
        let close_done = {
            let mut inner = self.lock();
            let state = inner.state;
            inner
                .close_done
                .get_or_insert_with(|| self.publish_close(state).shared())
                .clone()
        };
        close_done.await;

        let (dropped, abandoned) = {
            let mut inner = self.lock();
            (inner.buffer.clear(), inner.acks.teardown())
        };
        self.emitter.clear_listeners();

        if dropped > 0 || abandoned > 0 {
            debug!(
                "[Socket] {} topic torn down: {} buffered event(s) dropped, {} ack(s) abandoned",
                self.topic, dropped, abandoned
            );
        }
    }

    /// 发布 `close`，返回的 future 在所有监听器结束后完成
    fn publish_close(&self, state: SocketState) -> BoxFuture<'static, ()> {
        let topic = self.topic.clone();
        let data = CloseData {
            topic: topic.clone(),
            state,
        };
        let published = match serde_json::to_value(&data) {
            Ok(data) => self.emitter.emit(CLOSE_EVENT, data),
            Err(e) => {
                warn!("[Socket] Failed to encode close event: {}", e);
                return futures::future::ready(()).boxed();
            }
        };

        async move {
            match AssertUnwindSafe(published).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("[Socket] {} topic: {}", topic, e),
                Err(_) => warn!("[Socket] Close notification panicked for {} topic", topic),
            }
        }
        .boxed()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Socket")
            .field("topic", &self.topic)
            .field("state", &inner.state)
            .field("buffered", &inner.buffer.len())
            .field("acks", &inner.acks)
            .finish()
    }
}
