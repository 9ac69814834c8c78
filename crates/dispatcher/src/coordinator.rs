use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use workinator_core::{
    Assignment, ConsumerId, ConsumerRegistration, Coordinator, LeaseStore, PartitionConfiguration,
    PartitionInfo, WorkerStatus, WorkerStatusRecord, WorkinatorError, WorkinatorResult,
};

use crate::engine::AssignmentEngine;

/// 基于租约存储的协调器实现
pub struct WorkinatorCoordinator {
    store: Arc<dyn LeaseStore>,
    engine: AssignmentEngine,
}

impl WorkinatorCoordinator {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        let engine = AssignmentEngine::new(store.clone());
        Self { store, engine }
    }

    pub fn with_engine(store: Arc<dyn LeaseStore>, engine: AssignmentEngine) -> Self {
        Self { store, engine }
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    fn validate_partition(config: &PartitionConfiguration) -> WorkinatorResult<()> {
        if config.partition_key.trim().is_empty() {
            return Err(WorkinatorError::InvalidPartition(
                "分区键不能为空".to_string(),
            ));
        }
        if config.max_worker_count < 1 {
            return Err(WorkinatorError::InvalidPartition(format!(
                "分区 {} 的最大Worker数必须大于0，当前为 {}",
                config.partition_key, config.max_worker_count
            )));
        }
        if config.max_idle_time_seconds < 0 {
            return Err(WorkinatorError::InvalidPartition(format!(
                "分区 {} 的最大空闲时间不能为负数",
                config.partition_key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Coordinator for WorkinatorCoordinator {
    async fn register_consumer(
        &self,
        consumer_id: &ConsumerId,
    ) -> WorkinatorResult<ConsumerRegistration> {
        let registration = ConsumerRegistration::new(consumer_id.clone(), Uuid::new_v4().to_string());
        self.store.insert_consumer(&registration).await?;

        info!("注册消费者: {} (receipt: {})", consumer_id, registration.receipt);
        Ok(registration)
    }

    async fn unregister_consumer(
        &self,
        registration: &ConsumerRegistration,
    ) -> WorkinatorResult<()> {
        self.store.delete_consumer(registration).await?;
        info!("注销消费者: {}", registration.consumer_id);
        Ok(())
    }

    async fn create_partition(&self, config: PartitionConfiguration) -> WorkinatorResult<()> {
        Self::validate_partition(&config)?;
        self.store.create_partition(&config).await?;

        info!(
            "创建分区: {} (max_worker_count={}, max_idle_time_seconds={})",
            config.partition_key, config.max_worker_count, config.max_idle_time_seconds
        );
        Ok(())
    }

    async fn get_assignment(&self, status: &WorkerStatus) -> WorkinatorResult<Option<Assignment>> {
        self.engine.get_assignment(status).await
    }

    async fn release_assignment(&self, assignment: &Assignment) -> WorkinatorResult<()> {
        debug!(
            "释放分配: worker={}, partition={}",
            assignment.worker_id, assignment.partition_key
        );
        self.engine.release_assignment(assignment).await
    }

    async fn update_status(&self, statuses: &[WorkerStatus]) -> WorkinatorResult<()> {
        if let Err(e) = self.store.save_worker_statuses(statuses, Utc::now()).await {
            warn!("保存Worker状态失败，忽略: {}", e);
        }
        Ok(())
    }

    async fn list_partitions(&self) -> WorkinatorResult<Vec<PartitionInfo>> {
        self.store.list_partitions().await
    }

    async fn list_worker_statuses(&self) -> WorkinatorResult<Vec<WorkerStatusRecord>> {
        self.store.list_worker_statuses().await
    }

    async fn set_has_work(&self, partition_key: &str, has_work: bool) -> WorkinatorResult<()> {
        self.store.set_has_work(partition_key, has_work).await?;
        debug!("分区 {} has_work={}", partition_key, has_work);
        Ok(())
    }
}
