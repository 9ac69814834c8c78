use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use workinator_core::{
    AppConfig, ConsumerId, Coordinator, PartitionConfiguration, PartitionInfo, Service,
    ServiceStatus, WorkerStatusRecord, WorkinatorError,
};
use workinator_dispatcher::WorkinatorCoordinator;
use workinator_infrastructure::DatabaseManager;
use workinator_worker::{WorkinatorConsumer, WorkinatorConsumerBuilder};

use crate::demo::DemoWorkerFactory;

/// 演示工作回调每次处理的耗时
const DEMO_WORK_DELAY: Duration = Duration::from_millis(500);

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    coordinator: Arc<WorkinatorCoordinator>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("数据库迁移失败")?;

        let coordinator = Arc::new(WorkinatorCoordinator::new(database.lease_store()));
        Ok(Self {
            config,
            database,
            coordinator,
        })
    }

    /// 按配置启动Prometheus导出器
    pub fn init_metrics(&self) -> Result<()> {
        let observability = &self.config.observability;
        if !observability.metrics_enabled {
            return Ok(());
        }

        let address: SocketAddr = observability
            .metrics_bind_address
            .parse()
            .with_context(|| format!("无效的指标监听地址: {}", observability.metrics_bind_address))?;
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .map_err(|e| anyhow::anyhow!("启动Prometheus导出器失败: {e}"))?;

        info!("Prometheus指标导出器监听于 {}", address);
        Ok(())
    }

    pub async fn create_partition(
        &self,
        partition_key: &str,
        max_worker_count: Option<i32>,
        max_idle_time_seconds: Option<i64>,
    ) -> Result<()> {
        let defaults = &self.config.partition;
        let config = PartitionConfiguration::new(partition_key)
            .with_max_worker_count(max_worker_count.unwrap_or(defaults.max_worker_count))
            .with_max_idle_time_seconds(
                max_idle_time_seconds.unwrap_or(defaults.max_idle_time_seconds),
            );

        self.coordinator.create_partition(config).await?;
        Ok(())
    }

    pub async fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
        Ok(self.coordinator.list_partitions().await?)
    }

    pub async fn set_has_work(&self, partition_key: &str, has_work: bool) -> Result<()> {
        self.coordinator.set_has_work(partition_key, has_work).await?;
        Ok(())
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerStatusRecord>> {
        Ok(self.coordinator.list_worker_statuses().await?)
    }

    /// 以演示回调运行一组消费者，直到收到关闭信号
    pub async fn run_consumers(
        &self,
        consumer_ids: &[String],
        executors: Option<usize>,
        partitions: &[String],
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        for partition_key in partitions {
            match self.create_partition(partition_key, None, None).await {
                Ok(()) => {}
                Err(e) if is_partition_conflict(&e) => {
                    info!("分区 {} 已存在，跳过创建", partition_key);
                }
                Err(e) => return Err(e),
            }
        }

        let mut consumer_config = self.config.consumer.clone();
        if let Some(executors) = executors {
            consumer_config.max_executor_count = executors;
        }

        let factory = Arc::new(DemoWorkerFactory::new(
            self.database.lease_store(),
            DEMO_WORK_DELAY,
        ));
        let consumers = consumer_ids
            .iter()
            .map(|id| {
                WorkinatorConsumerBuilder::new(
                    ConsumerId::new(id.as_str()),
                    self.coordinator.clone(),
                    factory.clone(),
                )
                .config(consumer_config.clone())
                .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (index, consumer) in consumers.iter().enumerate() {
            if let Err(e) = consumer.start().await {
                self.stop_consumers(&consumers[..index]).await;
                return Err(e)
                    .with_context(|| format!("启动消费者 {} 失败", consumer.consumer_id()));
            }
        }

        let mut report = tokio::time::interval(consumer_config.status_interval());
        loop {
            tokio::select! {
                _ = report.tick() => {
                    for consumer in &consumers {
                        match serde_json::to_string_pretty(&consumer.info()) {
                            Ok(info) => println!("{info}"),
                            Err(e) => warn!("序列化消费者信息失败: {}", e),
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("开始停止所有消费者");
                    break;
                }
            }
        }

        self.stop_consumers(&consumers).await;
        Ok(())
    }

    async fn stop_consumers(&self, consumers: &[WorkinatorConsumer]) {
        for consumer in consumers {
            if consumer.status() == ServiceStatus::Starting {
                // 仍在启动中的消费者先等待启动完成
                let started = consumer.lifecycle().wait_for(ServiceStatus::Started);
                if tokio::time::timeout(Duration::from_secs(30), started).await.is_err() {
                    warn!("消费者 {} 启动超时", consumer.consumer_id());
                }
            }
            if let Err(e) = consumer.stop().await {
                error!("停止消费者 {} 失败: {}", consumer.consumer_id(), e);
            }
        }

        for consumer in consumers {
            let stopped = consumer.lifecycle().wait_for(ServiceStatus::Stopped);
            if tokio::time::timeout(Duration::from_secs(30), stopped).await.is_err() {
                warn!("消费者 {} 停止超时", consumer.consumer_id());
            }
        }
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}

fn is_partition_conflict(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<WorkinatorError>(),
        Some(WorkinatorError::PartitionExists { .. })
    )
}
