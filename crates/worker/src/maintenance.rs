use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use workinator_core::{Lifecycle, Service, WorkinatorResult};

pub type ScheduledAction = Arc<dyn Fn() -> BoxFuture<'static, WorkinatorResult<()>> + Send + Sync>;

/// 按固定间隔执行的后台任务
///
/// 首次tick在启动后立即触发。动作失败只记录日志，任务继续运行。
/// `stop` 等待循环退出后才返回，返回时任务已处于 `Stopped`。
pub struct ScheduledTask {
    period: Duration,
    action: ScheduledAction,
    lifecycle: Arc<Lifecycle>,
    running: Mutex<Option<(broadcast::Sender<()>, JoinHandle<()>)>>,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, period: Duration, action: ScheduledAction) -> Self {
        Self {
            period,
            action,
            lifecycle: Arc::new(Lifecycle::new(name)),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Service for ScheduledTask {
    async fn start(&self) -> WorkinatorResult<()> {
        self.lifecycle.begin_start()?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let action = Arc::clone(&self.action);
        let lifecycle = Arc::clone(&self.lifecycle);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = (action)().await {
                            error!("定时任务 {} 执行失败: {}", lifecycle.name(), e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("定时任务 {} 正在关闭", lifecycle.name());
                        break;
                    }
                }
            }
            lifecycle.stop_complete();
        });
        *self.running.lock().await = Some((shutdown_tx, handle));

        self.lifecycle.start_complete();
        Ok(())
    }

    async fn stop(&self) -> WorkinatorResult<()> {
        self.lifecycle.begin_stop()?;
        let running = self.running.lock().await.take();
        match running {
            Some((shutdown_tx, handle)) => {
                let _ = shutdown_tx.send(());
                if let Err(e) = handle.await {
                    error!("定时任务 {} 异常退出: {}", self.lifecycle.name(), e);
                    self.lifecycle.stop_complete();
                }
            }
            None => {
                self.lifecycle.stop_complete();
            }
        }
        Ok(())
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}
