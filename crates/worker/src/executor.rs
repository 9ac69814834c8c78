//! 执行器：一个槽位上的分配循环
//!
//! 每次迭代要么在最短工作时间内继续处理当前分区，要么向协调器重新申请分配。
//! 收到停止信号后释放持有的分区，再报告停止完成。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use workinator_core::{
    Assignment, AsyncWorker, ConsumerConfig, Coordinator, Lifecycle, Service, ServiceStatus,
    WorkerContext, WorkerId, WorkerStatus, WorkinatorResult,
};

/// 执行器循环参数
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub min_work_time: Duration,
    pub idle_backoff: Duration,
    pub idle_jitter: Duration,
}

impl From<&ConsumerConfig> for ExecutorSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            min_work_time: config.min_work_time(),
            idle_backoff: config.idle_backoff(),
            idle_jitter: Duration::from_millis(config.idle_jitter_ms),
        }
    }
}

impl ExecutorSettings {
    fn idle_duration(&self) -> Duration {
        let jitter_ms = u64::try_from(self.idle_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.idle_backoff;
        }
        self.idle_backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// 执行器的只读快照
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorInfo {
    pub worker_id: String,
    pub assignee: String,
    pub service_status: ServiceStatus,
    pub current_assignment: Option<Assignment>,
    pub has_work: bool,
    pub assignment_count: u64,
}

#[derive(Debug)]
struct ExecutorState {
    status: WorkerStatus,
    acquired_at: Option<Instant>,
    assigned_at: Option<DateTime<Utc>>,
    assignment_count: u64,
}

impl ExecutorState {
    fn adopt(&mut self, assignment: Assignment) {
        self.status.current_assignment = Some(assignment);
        self.acquired_at = Some(Instant::now());
        self.assigned_at = Some(Utc::now());
        self.assignment_count += 1;
    }

    fn drop_assignment(&mut self) -> Option<Assignment> {
        self.acquired_at = None;
        self.assigned_at = None;
        self.status.current_assignment.take()
    }
}

pub struct Executor {
    worker_id: WorkerId,
    coordinator: Arc<dyn Coordinator>,
    worker: Arc<dyn AsyncWorker>,
    settings: ExecutorSettings,
    lifecycle: Arc<Lifecycle>,
    state: Arc<Mutex<ExecutorState>>,
    shutdown_tx: tokio::sync::Mutex<Option<broadcast::Sender<()>>>,
}

impl Executor {
    pub fn new(
        worker_id: WorkerId,
        coordinator: Arc<dyn Coordinator>,
        worker: Arc<dyn AsyncWorker>,
        settings: ExecutorSettings,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::new(format!("executor-{worker_id}")));
        let state = ExecutorState {
            status: WorkerStatus::new(worker_id.clone()),
            acquired_at: None,
            assigned_at: None,
            assignment_count: 0,
        };
        Self {
            worker_id,
            coordinator,
            worker,
            settings,
            lifecycle,
            state: Arc::new(Mutex::new(state)),
            shutdown_tx: tokio::sync::Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// 最近一次的Worker状态，用于状态上报
    pub fn worker_status(&self) -> WorkerStatus {
        lock(&self.state).status.clone()
    }

    pub fn info(&self) -> ExecutorInfo {
        let state = lock(&self.state);
        ExecutorInfo {
            worker_id: self.worker_id.to_string(),
            assignee: self.worker_id.assignee(),
            service_status: self.lifecycle.status(),
            current_assignment: state.status.current_assignment.clone(),
            has_work: state.status.has_work,
            assignment_count: state.assignment_count,
        }
    }

    /// 关闭工作回调
    pub fn close(&self) -> WorkinatorResult<()> {
        self.worker.close()
    }
}

#[async_trait]
impl Service for Executor {
    async fn start(&self) -> WorkinatorResult<()> {
        self.lifecycle.begin_start()?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let executor_loop = ExecutorLoop {
            coordinator: Arc::clone(&self.coordinator),
            worker: Arc::clone(&self.worker),
            settings: self.settings,
            lifecycle: Arc::clone(&self.lifecycle),
            state: Arc::clone(&self.state),
            shutdown_rx,
        };
        tokio::spawn(executor_loop.run());
        Ok(())
    }

    async fn stop(&self) -> WorkinatorResult<()> {
        self.lifecycle.begin_stop()?;
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}

fn lock(state: &Mutex<ExecutorState>) -> MutexGuard<'_, ExecutorState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

struct ExecutorLoop {
    coordinator: Arc<dyn Coordinator>,
    worker: Arc<dyn AsyncWorker>,
    settings: ExecutorSettings,
    lifecycle: Arc<Lifecycle>,
    state: Arc<Mutex<ExecutorState>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ExecutorLoop {
    async fn run(mut self) {
        self.lifecycle.start_complete();
        info!("执行器 {} 开始运行", self.lifecycle.name());

        while !self.stop_requested() {
            if !self.iterate().await {
                break;
            }
            // 回调可能没有挂起点，每次迭代后让出执行权
            tokio::task::yield_now().await;
        }

        self.release_held().await;
        info!("执行器 {} 已退出循环", self.lifecycle.name());
        self.lifecycle.stop_complete();
    }

    fn stop_requested(&mut self) -> bool {
        !matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// 返回 `false` 表示在等待中收到了停止信号
    async fn iterate(&mut self) -> bool {
        let (held, within_min_work_time, has_work) = {
            let state = lock(&self.state);
            let within = state
                .acquired_at
                .is_some_and(|acquired| acquired.elapsed() < self.settings.min_work_time);
            (
                state.status.current_assignment.clone(),
                within,
                state.status.has_work,
            )
        };

        if let Some(assignment) = held.as_ref().filter(|_| within_min_work_time) {
            if !self.execute(assignment).await {
                return self.idle().await;
            }
            return true;
        }

        if !has_work && held.is_some() {
            self.release_held().await;
        }

        let status = lock(&self.state).status.clone();
        let granted = match self.coordinator.get_assignment(&status).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => {
                debug!("执行器 {} 没有获得分配", self.lifecycle.name());
                return self.idle().await;
            }
            Err(e) => {
                error!("执行器 {} 获取分配失败: {}", self.lifecycle.name(), e);
                return self.idle().await;
            }
        };

        let replaced = {
            let mut state = lock(&self.state);
            let is_same = state
                .status
                .current_assignment
                .as_ref()
                .is_some_and(|current| current.is_same_partition(&granted));
            if is_same {
                None
            } else {
                let old = state.drop_assignment();
                state.adopt(granted.clone());
                old
            }
        };

        if let Some(old) = replaced {
            self.release(&old).await;
        }

        if !self.execute(&granted).await {
            return self.idle().await;
        }
        true
    }

    /// 执行一次工作回调，返回回调报告的 `has_work`
    async fn execute(&self, assignment: &Assignment) -> bool {
        let assigned_at = lock(&self.state).assigned_at.unwrap_or_else(Utc::now);
        let mut context = WorkerContext::new(assignment.clone(), assigned_at);

        let has_work = match self.worker.execute(&mut context).await {
            Ok(()) => context.has_work(),
            Err(e) => {
                warn!(
                    "执行器 {} 处理分区 {} 失败: {}",
                    self.lifecycle.name(),
                    assignment.partition_key,
                    e
                );
                false
            }
        };

        lock(&self.state).status.has_work = has_work;
        has_work
    }

    /// 空闲等待，可被停止信号打断
    async fn idle(&mut self) -> bool {
        let duration = self.settings.idle_duration();
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown_rx.recv() => false,
        }
    }

    async fn release_held(&self) {
        let held = lock(&self.state).drop_assignment();
        if let Some(assignment) = held {
            self.release(&assignment).await;
        }
    }

    async fn release(&self, assignment: &Assignment) {
        if let Err(e) = self.coordinator.release_assignment(assignment).await {
            warn!(
                "执行器 {} 释放分区 {} 失败: {}",
                self.lifecycle.name(),
                assignment.partition_key,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use workinator_core::{ConsumerId, ConsumerRegistration, PartitionConfiguration, ServiceStatus};
    use workinator_dispatcher::WorkinatorCoordinator;
    use workinator_infrastructure::InMemoryLeaseStore;

    struct CountingWorker {
        executions: AtomicUsize,
        has_work: bool,
    }

    #[async_trait]
    impl AsyncWorker for CountingWorker {
        async fn execute(&self, context: &mut WorkerContext) -> WorkinatorResult<()> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            context.set_has_work(self.has_work);
            Ok(())
        }
    }

    fn create_test_settings() -> ExecutorSettings {
        ExecutorSettings {
            min_work_time: Duration::from_secs(30),
            idle_backoff: Duration::from_millis(10),
            idle_jitter: Duration::from_millis(5),
        }
    }

    fn create_test_worker_id(slot: usize) -> WorkerId {
        WorkerId::new(ConsumerRegistration::new(ConsumerId::new("c1"), "r1"), slot)
    }

    async fn create_test_coordinator(partitions: &[&str]) -> Arc<WorkinatorCoordinator> {
        let coordinator = Arc::new(WorkinatorCoordinator::new(Arc::new(InMemoryLeaseStore::new())));
        for key in partitions {
            coordinator
                .create_partition(PartitionConfiguration::new(*key))
                .await
                .unwrap();
        }
        coordinator
    }

    #[tokio::test]
    async fn test_executor_claims_and_releases_on_stop() {
        let coordinator = create_test_coordinator(&["p1"]).await;
        let worker = Arc::new(CountingWorker {
            executions: AtomicUsize::new(0),
            has_work: true,
        });
        let executor = Executor::new(
            create_test_worker_id(0),
            coordinator.clone(),
            worker.clone(),
            create_test_settings(),
        );

        executor.start().await.unwrap();
        executor.lifecycle().wait_for(ServiceStatus::Started).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let info = executor.info();
        assert_eq!(info.current_assignment.unwrap().partition_key, "p1");
        assert!(info.has_work);
        assert_eq!(info.assignment_count, 1);
        assert!(worker.executions.load(Ordering::SeqCst) > 1);

        executor.stop().await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            executor.lifecycle().wait_for(ServiceStatus::Stopped),
        )
        .await
        .unwrap();

        let partitions = coordinator.list_partitions().await.unwrap();
        assert_eq!(partitions[0].worker_count, 0);
        assert!(executor.worker_status().current_assignment.is_none());
    }

    #[tokio::test]
    async fn test_idle_executor_stops_promptly() {
        let coordinator = create_test_coordinator(&[]).await;
        let settings = ExecutorSettings {
            idle_backoff: Duration::from_secs(60),
            ..create_test_settings()
        };
        let executor = Executor::new(
            create_test_worker_id(0),
            coordinator,
            Arc::new(CountingWorker {
                executions: AtomicUsize::new(0),
                has_work: false,
            }),
            settings,
        );

        executor.start().await.unwrap();
        executor.lifecycle().wait_for(ServiceStatus::Started).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        executor.stop().await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            executor.lifecycle().wait_for(ServiceStatus::Stopped),
        )
        .await
        .unwrap();
        assert_eq!(executor.info().assignment_count, 0);
    }

    #[tokio::test]
    async fn test_executor_without_work_moves_between_partitions() {
        let coordinator = create_test_coordinator(&["p1", "p2"]).await;
        let settings = ExecutorSettings {
            min_work_time: Duration::ZERO,
            ..create_test_settings()
        };
        let executor = Executor::new(
            create_test_worker_id(0),
            coordinator.clone(),
            Arc::new(CountingWorker {
                executions: AtomicUsize::new(0),
                has_work: false,
            }),
            settings,
        );

        executor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 每次重新评估都先释放再领取，最久未检查的分区轮流被选中
        assert!(executor.info().assignment_count >= 2);
        let partitions = coordinator.list_partitions().await.unwrap();
        let held: i32 = partitions.iter().map(|p| p.worker_count).sum();
        assert!(held <= 1);

        executor.stop().await.unwrap();
        executor.lifecycle().wait_for(ServiceStatus::Stopped).await;
        let partitions = coordinator.list_partitions().await.unwrap();
        assert!(partitions.iter().all(|p| p.worker_count == 0));
    }

    fn create_idle_worker() -> Arc<CountingWorker> {
        Arc::new(CountingWorker {
            executions: AtomicUsize::new(0),
            has_work: false,
        })
    }

    #[tokio::test]
    async fn test_executor_keeps_partition_during_min_work_time() {
        let coordinator = create_test_coordinator(&["p1", "p2"]).await;
        let worker = create_idle_worker();
        let executor = Executor::new(
            create_test_worker_id(0),
            coordinator.clone(),
            worker.clone(),
            create_test_settings(),
        );

        executor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let info = executor.info();
        assert_eq!(info.assignment_count, 1);
        assert_eq!(info.current_assignment.unwrap().partition_key, "p1");
        assert!(worker.executions.load(Ordering::SeqCst) > 1);

        // 最短工作时间内不再向协调器请求分配
        let partitions = coordinator.list_partitions().await.unwrap();
        assert_eq!(partitions[0].assignment_count, 1);
        assert_eq!(partitions[1].assignment_count, 0);

        executor.stop().await.unwrap();
        executor.lifecycle().wait_for(ServiceStatus::Stopped).await;
    }

    #[tokio::test]
    async fn test_executor_reevaluates_after_min_work_time() {
        let coordinator = create_test_coordinator(&["p1", "p2"]).await;
        let settings = ExecutorSettings {
            min_work_time: Duration::from_millis(20),
            ..create_test_settings()
        };
        let executor = Executor::new(
            create_test_worker_id(0),
            coordinator.clone(),
            create_idle_worker(),
            settings,
        );

        executor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(executor.info().assignment_count >= 2);
        let partitions = coordinator.list_partitions().await.unwrap();
        assert!(partitions[1].assignment_count >= 1);

        executor.stop().await.unwrap();
        executor.lifecycle().wait_for(ServiceStatus::Stopped).await;
    }
}
