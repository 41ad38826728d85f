//! Ack 注册表
//!
//! 记录已发出但尚未被服务器确认的事件，按数字 ID 关联回调

use crate::error::SocketError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Ack ID，单个订阅内单调递增，不会复用
pub type AckId = u64;

/// Ack 结果：成功时携带服务器返回的数据，失败时携带错误信息
pub type AckResult = Result<Value, SocketError>;

/// Ack 回调类型
pub type AckCallback = Box<dyn FnOnce(AckResult) + Send + 'static>;

/// 待执行的 Ack 回调
///
/// 注册表只负责把回调取出并配好结果，真正执行由调用方在释放锁之后完成，
/// 这样回调里再次调用 `emit` 不会死锁。
#[must_use = "the ack callback only runs when `complete` is called"]
pub struct AckCompletion {
    id: AckId,
    callback: AckCallback,
    result: AckResult,
}

impl AckCompletion {
    pub fn id(&self) -> AckId {
        self.id
    }

    /// 执行回调
    pub fn complete(self) {
        (self.callback)(self.result);
    }
}

impl fmt::Debug for AckCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckCompletion")
            .field("id", &self.id)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// Ack 注册表
pub struct AckRegistry {
    pending: HashMap<AckId, AckCallback>,
    next_id: AckId,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    /// 注册回调并分配下一个 ID
    pub fn register(&mut self, callback: AckCallback) -> AckId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, callback);
        id
    }

    /// 服务器确认成功
    ///
    /// 未知 ID 返回 `None`：关闭与在途 ack 竞争时这是正常情况。
    pub fn resolve(&mut self, id: AckId, data: Value) -> Option<AckCompletion> {
        self.pending.remove(&id).map(|callback| AckCompletion {
            id,
            callback,
            result: Ok(data),
        })
    }

    /// 服务器确认失败
    pub fn reject(&mut self, id: AckId, message: impl Into<String>) -> Option<AckCompletion> {
        self.pending.remove(&id).map(|callback| AckCompletion {
            id,
            callback,
            result: Err(SocketError::AckRejected(message.into())),
        })
    }

    /// 移除回调但不执行（发送失败时回滚注册）
    pub fn discard(&mut self, id: AckId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// 清空注册表，剩余回调直接丢弃，不会被调用
    pub fn teardown(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }

    pub fn contains(&self, id: AckId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 下一个将被分配的 ID
    pub fn next_id(&self) -> AckId {
        self.next_id
    }
}

impl Default for AckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("AckRegistry")
            .field("pending", &ids)
            .field("next_id", &self.next_id)
            .finish()
    }
}
