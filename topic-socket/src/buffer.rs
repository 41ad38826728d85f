//! 发送缓冲
//!
//! 订阅确认之前发出的事件先排队，确认后按原顺序补发

use crate::ack::AckCallback;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;

/// 缓冲中的一条事件
pub struct BufferedEmit {
    pub event: String,
    pub data: Value,
    pub ack: Option<AckCallback>,
}

impl fmt::Debug for BufferedEmit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedEmit")
            .field("event", &self.event)
            .field("data", &self.data)
            .field("ack", &self.ack.is_some())
            .finish()
    }
}

/// 发送缓冲
#[derive(Debug, Default)]
pub struct EmitBuffer {
    queue: VecDeque<BufferedEmit>,
}

impl EmitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: String, data: Value, ack: Option<AckCallback>) {
        self.queue.push_back(BufferedEmit { event, data, ack });
    }

    /// 取出全部缓冲事件，缓冲随之清空
    pub fn take_all(&mut self) -> VecDeque<BufferedEmit> {
        std::mem::take(&mut self.queue)
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_all_preserves_order() {
        let mut buffer = EmitBuffer::new();
        buffer.push("msg".into(), json!("a"), None);
        buffer.push("msg".into(), json!("b"), Some(Box::new(|_| {})));
        buffer.push("typing".into(), json!(true), None);
        assert_eq!(buffer.len(), 3);

        let drained: Vec<_> = buffer.take_all().into_iter().collect();
        assert!(buffer.is_empty());
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].data, json!("a"));
        assert!(drained[0].ack.is_none());
        assert_eq!(drained[1].data, json!("b"));
        assert!(drained[1].ack.is_some());
        assert_eq!(drained[2].event, "typing");
    }

    #[test]
    fn test_clear() {
        let mut buffer = EmitBuffer::new();
        buffer.push("msg".into(), json!(1), None);
        assert_eq!(buffer.clear(), 1);
        assert!(buffer.is_empty());
        assert!(buffer.take_all().is_empty());
    }
}
