//! 通用服务生命周期状态机
//!
//! `NotStarted → Starting → Started → Stopping → Stopped`，`Stopped` 可以重新启动。
//! 组件调用 [`Lifecycle::begin_start`] 进入 `Starting`，完成自己的启动动作后再调用
//! [`Lifecycle::start_complete`]，此时才会切换到 `Started` 并通知观察者；停止流程对称。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{models::ServiceStatus, WorkinatorError, WorkinatorResult};

/// 受生命周期管理的服务
#[async_trait]
pub trait Service: Send + Sync {
    /// 开始启动，服务在自身报告完成后才进入 `Started`
    async fn start(&self) -> WorkinatorResult<()>;

    /// 开始停止，服务在自身报告完成后才进入 `Stopped`
    async fn stop(&self) -> WorkinatorResult<()>;

    fn lifecycle(&self) -> &Lifecycle;

    fn status(&self) -> ServiceStatus {
        self.lifecycle().status()
    }
}

/// 观察者收到的状态切换事件
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub service: String,
    pub status: ServiceStatus,
}

/// 观察者句柄，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&TransitionEvent) -> WorkinatorResult<()> + Send + Sync>;

type ObserverList = RwLock<Vec<(ObserverId, Observer)>>;

pub struct Lifecycle {
    name: String,
    state: Mutex<ServiceStatus>,
    status_tx: watch::Sender<ServiceStatus>,
    started_observers: ObserverList,
    stopped_observers: ObserverList,
    next_observer_id: AtomicU64,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        let (status_tx, _) = watch::channel(ServiceStatus::NotStarted);
        Self {
            name: name.into(),
            state: Mutex::new(ServiceStatus::NotStarted),
            status_tx,
            started_observers: RwLock::new(Vec::new()),
            stopped_observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ServiceStatus {
        *self.lock_state()
    }

    /// `NotStarted | Stopped → Starting`
    pub fn begin_start(&self) -> WorkinatorResult<()> {
        self.begin(ServiceStatus::can_start, ServiceStatus::Starting)
    }

    /// `Started → Stopping`
    pub fn begin_stop(&self) -> WorkinatorResult<()> {
        self.begin(ServiceStatus::can_stop, ServiceStatus::Stopping)
    }

    /// `Starting → Started`，并通知 on-started 观察者
    ///
    /// 不在 `Starting` 状态时忽略，返回 `false`。
    pub fn start_complete(&self) -> bool {
        if !self.complete(ServiceStatus::Starting, ServiceStatus::Started) {
            return false;
        }
        self.notify(&self.started_observers, ServiceStatus::Started);
        true
    }

    /// `Stopping → Stopped`，并通知 on-stopped 观察者
    pub fn stop_complete(&self) -> bool {
        if !self.complete(ServiceStatus::Stopping, ServiceStatus::Stopped) {
            return false;
        }
        self.notify(&self.stopped_observers, ServiceStatus::Stopped);
        true
    }

    /// 启动过程中遇到致命错误时回退到 `Stopped`，不通知任何观察者
    pub fn abort_start(&self) -> bool {
        self.complete(ServiceStatus::Starting, ServiceStatus::Stopped)
    }

    pub fn on_started<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&TransitionEvent) -> WorkinatorResult<()> + Send + Sync + 'static,
    {
        self.subscribe_to(&self.started_observers, Arc::new(observer))
    }

    pub fn on_stopped<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&TransitionEvent) -> WorkinatorResult<()> + Send + Sync + 'static,
    {
        self.subscribe_to(&self.stopped_observers, Arc::new(observer))
    }

    /// 取消单个观察者，返回是否找到
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut removed = false;
        for list in [&self.started_observers, &self.stopped_observers] {
            let mut observers = list.write().unwrap_or_else(|e| e.into_inner());
            let before = observers.len();
            observers.retain(|(observer_id, _)| *observer_id != id);
            removed |= observers.len() != before;
        }
        removed
    }

    pub fn unsubscribe_all(&self) {
        for list in [&self.started_observers, &self.stopped_observers] {
            list.write().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    /// 订阅状态变化
    pub fn watch(&self) -> watch::Receiver<ServiceStatus> {
        self.status_tx.subscribe()
    }

    /// 等待进入指定状态，已处于该状态时立即返回
    pub async fn wait_for(&self, status: ServiceStatus) {
        let mut rx = self.watch();
        // 发送端与self同生命周期，不会提前关闭
        let _ = rx.wait_for(|current| *current == status).await;
    }

    fn lock_state(&self) -> MutexGuard<'_, ServiceStatus> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self, allowed: fn(&ServiceStatus) -> bool, next: ServiceStatus) -> WorkinatorResult<()> {
        let mut state = self.lock_state();
        if !allowed(&state) {
            return Err(WorkinatorError::InvalidTransition {
                service: self.name.clone(),
                from: state.to_string(),
                to: next.to_string(),
            });
        }
        *state = next;
        self.status_tx.send_replace(next);
        info!("服务 {} 状态切换为 {}", self.name, next);
        Ok(())
    }

    fn complete(&self, expected: ServiceStatus, next: ServiceStatus) -> bool {
        let mut state = self.lock_state();
        if *state != expected {
            warn!(
                "服务 {} 当前状态为 {}，忽略切换到 {} 的请求",
                self.name, *state, next
            );
            return false;
        }
        *state = next;
        self.status_tx.send_replace(next);
        info!("服务 {} 状态切换为 {}", self.name, next);
        true
    }

    fn subscribe_to(&self, list: &ObserverList, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        list.write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, observer));
        id
    }

    fn notify(&self, list: &ObserverList, status: ServiceStatus) {
        // 先复制列表，观察者内部可以安全地订阅或取消订阅
        let observers: Vec<Observer> = list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        let event = TransitionEvent {
            service: self.name.clone(),
            status,
        };
        debug!("通知 {} 个观察者: {} -> {}", observers.len(), self.name, status);

        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("执行生命周期观察者失败: service={}, error={}", self.name, e);
                }
                Err(_) => {
                    error!("生命周期观察者发生panic: service={}", self.name);
                }
            }
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
