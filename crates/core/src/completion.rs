use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::warn;

type CompletionAction = Box<dyn FnOnce() + Send>;

/// 一次性倒计数屏障
///
/// 计数归零的那次 `count_down` 在调用方线程上同步执行完成动作，且只执行一次。
/// 没有重置方法，每个启动/停止周期都必须创建新的实例。
pub struct CompletionCounter {
    name: String,
    remaining: AtomicUsize,
    on_complete: Mutex<Option<CompletionAction>>,
}

impl CompletionCounter {
    pub fn new<F>(name: impl Into<String>, count: usize, on_complete: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: name.into(),
            remaining: AtomicUsize::new(count),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        }
    }

    /// 计数减一，返回本次调用是否触发了完成动作
    pub fn count_down(&self) -> bool {
        match self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => {
                let action = self
                    .on_complete
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                if let Some(action) = action {
                    action();
                }
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!("计数器 {} 已经归零，忽略多余的完成通知", self.name);
                false
            }
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

impl std::fmt::Debug for CompletionCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionCounter")
            .field("name", &self.name)
            .field("remaining", &self.remaining())
            .finish()
    }
}
