use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};

use workinator_core::{
    CompletionCounter, ConsumerConfig, ConsumerId, ConsumerRegistration, Coordinator, Lifecycle,
    Service, ServiceStatus, WorkerFactory, WorkerId, WorkinatorError, WorkinatorResult,
};

use crate::executor::{Executor, ExecutorInfo, ExecutorSettings};
use crate::maintenance::{ScheduledAction, ScheduledTask};

/// `None` 表示执行器列表尚未安装
type ExecutorList = Arc<RwLock<Option<Vec<Arc<Executor>>>>>;

/// 消费者的只读快照
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerInfo {
    pub consumer_id: String,
    pub service_status: ServiceStatus,
    pub executors: Vec<ExecutorInfo>,
}

/// 执行器池
///
/// 持有 `max_executor_count` 个执行器，对外表现为一个服务：所有执行器都报告
/// 启动后才进入 `Started`，全部报告停止并关闭后才进入 `Stopped`。
pub struct WorkinatorConsumer {
    consumer_id: ConsumerId,
    coordinator: Arc<dyn Coordinator>,
    worker_factory: Arc<dyn WorkerFactory>,
    config: ConsumerConfig,
    lifecycle: Arc<Lifecycle>,
    executors: ExecutorList,
    status_task: ScheduledTask,
}

impl WorkinatorConsumer {
    pub fn new(
        consumer_id: ConsumerId,
        coordinator: Arc<dyn Coordinator>,
        worker_factory: Arc<dyn WorkerFactory>,
        config: ConsumerConfig,
    ) -> Self {
        let executors: ExecutorList = Arc::new(RwLock::new(None));
        let status_task = ScheduledTask::new(
            format!("{consumer_id}-status"),
            config.status_interval(),
            Self::status_action(Arc::clone(&executors), Arc::clone(&coordinator)),
        );

        Self {
            lifecycle: Arc::new(Lifecycle::new(format!("consumer-{consumer_id}"))),
            consumer_id,
            coordinator,
            worker_factory,
            config,
            executors,
            status_task,
        }
    }

    pub fn consumer_id(&self) -> &ConsumerId {
        &self.consumer_id
    }

    pub fn info(&self) -> ConsumerInfo {
        let executors = snapshot(&self.executors)
            .map(|list| list.iter().map(|executor| executor.info()).collect())
            .unwrap_or_default();

        ConsumerInfo {
            consumer_id: self.consumer_id.to_string(),
            service_status: self.lifecycle.status(),
            executors,
        }
    }

    /// 定时上报所有执行器的状态，执行器列表未安装时什么也不做
    fn status_action(executors: ExecutorList, coordinator: Arc<dyn Coordinator>) -> ScheduledAction {
        Arc::new(move || {
            let executors = Arc::clone(&executors);
            let coordinator = Arc::clone(&coordinator);
            async move {
                let Some(list) = snapshot(&executors) else {
                    return Ok(());
                };
                let statuses: Vec<_> = list.iter().map(|executor| executor.worker_status()).collect();
                coordinator.update_status(&statuses).await
            }
            .boxed()
        })
    }

    async fn register(&self) -> WorkinatorResult<ConsumerRegistration> {
        let registration = self.coordinator.register_consumer(&self.consumer_id).await?;
        if !registration.is_valid() {
            return Err(WorkinatorError::FatalSetup(format!(
                "消费者 {} 的注册结果无效",
                self.consumer_id
            )));
        }
        Ok(registration)
    }

    fn create_executors(
        &self,
        registration: &ConsumerRegistration,
    ) -> WorkinatorResult<Vec<Arc<Executor>>> {
        let settings = ExecutorSettings::from(&self.config);
        (0..self.config.max_executor_count)
            .map(|slot| {
                let worker_id = WorkerId::new(registration.clone(), slot);
                let worker = self.worker_factory.create_worker(&worker_id)?;
                Ok(Arc::new(Executor::new(
                    worker_id,
                    Arc::clone(&self.coordinator),
                    worker,
                    settings,
                )))
            })
            .collect()
    }

    /// 启动失败时回滚到 `Stopped`
    async fn rollback_start(&self, registration: Option<&ConsumerRegistration>) {
        if let Err(e) = self.status_task.stop().await {
            warn!("停止状态上报任务失败: {}", e);
        }
        if let Some(registration) = registration {
            if let Err(e) = self.coordinator.unregister_consumer(registration).await {
                warn!("回滚时注销消费者 {} 失败: {}", self.consumer_id, e);
            }
        }
        self.lifecycle.abort_start();
    }

    /// 停止计数器归零后：关闭执行器，注销消费者，最后进入 `Stopped`
    fn create_counters(
        &self,
        count: usize,
        registration: ConsumerRegistration,
    ) -> (Arc<CompletionCounter>, Arc<CompletionCounter>) {
        let lifecycle = Arc::clone(&self.lifecycle);
        let started = Arc::new(CompletionCounter::new(
            format!("{}-started", self.consumer_id),
            count,
            move || {
                lifecycle.start_complete();
            },
        ));

        let lifecycle = Arc::clone(&self.lifecycle);
        let executors = Arc::clone(&self.executors);
        let coordinator = Arc::clone(&self.coordinator);
        let consumer_id = self.consumer_id.clone();
        let stopped = Arc::new(CompletionCounter::new(
            format!("{}-stopped", self.consumer_id),
            count,
            move || {
                let list = executors
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .take()
                    .unwrap_or_default();
                for executor in &list {
                    if let Err(e) = executor.close() {
                        error!("关闭执行器 {} 失败: {}", executor.worker_id(), e);
                    }
                }
                info!("消费者 {} 已关闭 {} 个执行器", consumer_id, list.len());

                tokio::spawn(async move {
                    if let Err(e) = coordinator.unregister_consumer(&registration).await {
                        warn!("注销消费者 {} 失败: {}", consumer_id, e);
                    }
                    lifecycle.stop_complete();
                });
            },
        ));

        (started, stopped)
    }
}

fn snapshot(executors: &ExecutorList) -> Option<Vec<Arc<Executor>>> {
    executors.read().unwrap_or_else(|e| e.into_inner()).clone()
}

#[async_trait]
impl Service for WorkinatorConsumer {
    async fn start(&self) -> WorkinatorResult<()> {
        self.lifecycle.begin_start()?;
        info!("启动消费者: {}", self.consumer_id);

        if self.config.max_executor_count == 0 {
            self.lifecycle.abort_start();
            return Err(WorkinatorError::Configuration(
                "执行器数量必须大于0".to_string(),
            ));
        }

        if let Err(e) = self.status_task.start().await {
            self.lifecycle.abort_start();
            return Err(e);
        }

        let registration = match self.register().await {
            Ok(registration) => registration,
            Err(e) => {
                error!("消费者 {} 注册失败: {}", self.consumer_id, e);
                self.rollback_start(None).await;
                return Err(e);
            }
        };

        let executors = match self.create_executors(&registration) {
            Ok(executors) => executors,
            Err(e) => {
                error!("消费者 {} 创建执行器失败: {}", self.consumer_id, e);
                self.rollback_start(Some(&registration)).await;
                return Err(e);
            }
        };
        // 计数器每个周期重新创建
        let (started, stopped) = self.create_counters(executors.len(), registration);
        for executor in &executors {
            let started = Arc::clone(&started);
            executor.lifecycle().on_started(move |_| {
                started.count_down();
                Ok(())
            });
            let stopped = Arc::clone(&stopped);
            executor.lifecycle().on_stopped(move |_| {
                stopped.count_down();
                Ok(())
            });
        }

        *self.executors.write().unwrap_or_else(|e| e.into_inner()) = Some(executors.clone());
        for executor in &executors {
            executor.start().await?;
        }
        Ok(())
    }

    async fn stop(&self) -> WorkinatorResult<()> {
        self.lifecycle.begin_stop()?;
        info!("停止消费者: {}", self.consumer_id);

        if let Err(e) = self.status_task.stop().await {
            warn!("停止状态上报任务失败: {}", e);
        }

        for executor in snapshot(&self.executors).unwrap_or_default() {
            if let Err(e) = executor.stop().await {
                error!("停止执行器 {} 失败: {}", executor.worker_id(), e);
            }
        }
        Ok(())
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}

/// 执行器池构建器
pub struct WorkinatorConsumerBuilder {
    consumer_id: ConsumerId,
    coordinator: Arc<dyn Coordinator>,
    worker_factory: Arc<dyn WorkerFactory>,
    config: ConsumerConfig,
}

impl WorkinatorConsumerBuilder {
    pub fn new(
        consumer_id: ConsumerId,
        coordinator: Arc<dyn Coordinator>,
        worker_factory: Arc<dyn WorkerFactory>,
    ) -> Self {
        Self {
            consumer_id,
            coordinator,
            worker_factory,
            config: ConsumerConfig::default(),
        }
    }

    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_executor_count(mut self, max_executor_count: usize) -> Self {
        self.config.max_executor_count = max_executor_count;
        self
    }

    pub fn build(self) -> WorkinatorResult<WorkinatorConsumer> {
        self.config
            .validate()
            .map_err(|e| WorkinatorError::Configuration(e.to_string()))?;

        Ok(WorkinatorConsumer::new(
            self.consumer_id,
            self.coordinator,
            self.worker_factory,
            self.config,
        ))
    }
}
