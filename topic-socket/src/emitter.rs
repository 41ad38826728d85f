//! 事件总线
//!
//! 应用层通过 `on` / `once` / `off` 监听订阅事件。`emit` 会等待所有监听器执行完毕，
//! 监听器返回的错误和 panic 都会被收集成 [`ListenerError`]，不会向外传播 panic。

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::warn;

/// 监听器 ID
pub type ListenerId = u64;

/// 监听器类型
pub type Listener = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 把异步闭包包装成 [`Listener`]
pub fn listener<F, Fut>(f: F) -> Listener
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |data| f(data).boxed())
}

/// 监听器执行失败
#[derive(Error, Debug, Clone)]
#[error("{failed} listener(s) failed for {event} event: {message}")]
pub struct ListenerError {
    pub event: String,
    /// 失败的监听器数量
    pub failed: usize,
    /// 第一个失败的原因
    pub message: String,
}

/// 事件总线能力
///
/// 只要求 `emit` 可以被等待到所有监听器结束（包括失败），不假设同步投递。
pub trait EventBus: Send + Sync {
    /// 注册监听器
    fn on(&self, event: &str, listener: Listener) -> ListenerId;

    /// 注册只触发一次的监听器
    fn once(&self, event: &str, listener: Listener) -> ListenerId;

    /// 移除监听器，返回是否存在
    fn off(&self, event: &str, id: ListenerId) -> bool;

    /// 发布事件并等待所有监听器完成
    fn emit(&self, event: &str, data: Value) -> BoxFuture<'static, Result<(), ListenerError>>;

    /// 移除全部监听器
    fn clear_listeners(&self);

    /// 监听器数量，`None` 表示全部事件
    fn listener_count(&self, event: Option<&str>) -> usize;
}

struct Registered {
    id: ListenerId,
    listener: Listener,
    once: bool,
}

/// 默认的内存事件总线
#[derive(Default)]
pub struct Emitter {
    listeners: Mutex<HashMap<String, Vec<Registered>>>,
    next_id: AtomicU64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Registered>>> {
        // 监听器只在锁外执行，锁中毒时数据仍然一致
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, event: &str, listener: Listener, once: bool) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .entry(event.to_string())
            .or_default()
            .push(Registered { id, listener, once });
        id
    }
}

impl EventBus for Emitter {
    fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.add(event, listener, false)
    }

    fn once(&self, event: &str, listener: Listener) -> ListenerId {
        self.add(event, listener, true)
    }

    fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Some(registered) = listeners.get_mut(event) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|r| r.id != id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    fn emit(&self, event: &str, data: Value) -> BoxFuture<'static, Result<(), ListenerError>> {
        let targets: Vec<Listener> = {
            let mut listeners = self.lock();
            match listeners.get_mut(event) {
                Some(registered) => {
                    let targets = registered.iter().map(|r| r.listener.clone()).collect();
                    registered.retain(|r| !r.once);
                    if registered.is_empty() {
                        listeners.remove(event);
                    }
                    targets
                }
                None => Vec::new(),
            }
        };
        let event = event.to_string();

        async move {
            let runs = targets.into_iter().map(|listener| {
                let data = data.clone();
                // 同步 panic 也要在 future 内部发生才能被 catch_unwind 捕获
                AssertUnwindSafe(async move { listener(data).await }).catch_unwind()
            });

            let mut failures = Vec::new();
            for outcome in join_all(runs).await {
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => failures.push(e.to_string()),
                    Err(panic) => failures.push(panic_message(panic.as_ref())),
                }
            }

            if failures.is_empty() {
                return Ok(());
            }
            for failure in &failures {
                warn!("[Emitter] Listener for {} failed: {}", event, failure);
            }
            Err(ListenerError {
                event,
                failed: failures.len(),
                message: failures.swap_remove(0),
            })
        }
        .boxed()
    }

    fn clear_listeners(&self) {
        self.lock().clear();
    }

    fn listener_count(&self, event: Option<&str>) -> usize {
        let listeners = self.lock();
        match event {
            Some(event) => listeners.get(event).map_or(0, Vec::len),
            None => listeners.values().map(Vec::len).sum(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("listener panicked: {}", s)
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Listener, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let l = listener(move |_| {
            let h = h.clone();
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (l, hits)
    }

    #[tokio::test]
    async fn test_on_and_emit() {
        let emitter = Emitter::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        emitter.on(
            "message",
            listener(move |data| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(data);
                    Ok(())
                }
            }),
        );

        emitter.emit("message", json!({"text": "hi"})).await.unwrap();
        emitter.emit("other", json!(1)).await.unwrap();

        assert_eq!(*received.lock().unwrap(), vec![json!({"text": "hi"})]);
    }

    #[tokio::test]
    async fn test_once_fires_once() {
        let emitter = Emitter::new();
        let (l, hits) = counter();
        emitter.once("ready", l);
        assert_eq!(emitter.listener_count(Some("ready")), 1);

        emitter.emit("ready", json!(null)).await.unwrap();
        emitter.emit("ready", json!(null)).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(None), 0);
    }

    #[tokio::test]
    async fn test_off_removes_listener() {
        let emitter = Emitter::new();
        let (l, hits) = counter();
        let id = emitter.on("ping", l);

        assert!(emitter.off("ping", id));
        assert!(!emitter.off("ping", id));
        emitter.emit("ping", json!(null)).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_are_collected() {
        let emitter = Emitter::new();
        let (ok, hits) = counter();
        emitter.on("close", ok);
        emitter.on("close", listener(|_| async { anyhow::bail!("listener rejected") }));
        emitter.on(
            "close",
            Arc::new(|_: Value| -> BoxFuture<'static, anyhow::Result<()>> {
                panic!("sync throw")
            }),
        );

        let err = emitter.emit("close", json!(null)).await.unwrap_err();
        assert_eq!(err.event, "close");
        assert_eq!(err.failed, 2);
        assert_eq!(err.message, "listener rejected");
        // 其他监听器照常执行
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_listeners() {
        let emitter = Emitter::new();
        let (a, hits) = counter();
        let (b, _) = counter();
        emitter.on("a", a);
        emitter.once("b", b);
        assert_eq!(emitter.listener_count(None), 2);

        emitter.clear_listeners();
        assert_eq!(emitter.listener_count(None), 0);
        emitter.emit("a", json!(null)).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
