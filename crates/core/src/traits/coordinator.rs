use async_trait::async_trait;

use crate::{
    models::{
        Assignment, ConsumerId, ConsumerRegistration, PartitionConfiguration, PartitionInfo,
        WorkerStatus, WorkerStatusRecord,
    },
    WorkinatorResult,
};

/// 协调器接口，供执行器池和运维工具调用
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// 注册消费者，ID已注册时返回 `ConsumerExists`
    async fn register_consumer(&self, consumer_id: &ConsumerId)
        -> WorkinatorResult<ConsumerRegistration>;

    async fn unregister_consumer(&self, registration: &ConsumerRegistration)
        -> WorkinatorResult<()>;

    /// 创建分区，键已存在时返回 `PartitionExists`
    async fn create_partition(&self, config: PartitionConfiguration) -> WorkinatorResult<()>;

    /// 为Worker计算下一个分配，`None` 表示当前没有可做的工作
    async fn get_assignment(&self, status: &WorkerStatus) -> WorkinatorResult<Option<Assignment>>;

    async fn release_assignment(&self, assignment: &Assignment) -> WorkinatorResult<()>;

    /// 批量上报Worker状态，尽力而为，仅用于观测
    async fn update_status(&self, statuses: &[WorkerStatus]) -> WorkinatorResult<()>;

    async fn list_partitions(&self) -> WorkinatorResult<Vec<PartitionInfo>>;

    async fn list_worker_statuses(&self) -> WorkinatorResult<Vec<WorkerStatusRecord>>;

    /// 切换分区的外部 `has_work` 标记（运维和测试用）
    async fn set_has_work(&self, partition_key: &str, has_work: bool) -> WorkinatorResult<()>;
}
