use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{
        ConsumerRegistration, PartitionConfiguration, PartitionInfo, WorkerLease, WorkerStatus,
        WorkerStatusRecord,
    },
    WorkinatorResult,
};

/// 领取分区时的过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimFilter {
    /// `worker_count == 0 AND due_date < now`
    DueAndIdle { now: DateTime<Utc> },
    /// `has_work AND worker_count < max_worker_count`
    HasWorkWithCapacity,
    /// `worker_count == 0`
    Idle,
}

impl ClaimFilter {
    /// 判断分区是否满足过滤条件
    pub fn matches(&self, partition: &PartitionInfo) -> bool {
        match self {
            ClaimFilter::DueAndIdle { now } => partition.is_due(*now),
            ClaimFilter::HasWorkWithCapacity => partition.has_work && partition.has_capacity(),
            ClaimFilter::Idle => partition.is_idle(),
        }
    }
}

/// 多个分区满足条件时的排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOrder {
    /// `last_checked_date ASC`，从未检查过的分区优先
    LeastRecentlyChecked,
    /// `worker_count ASC, last_checked_date ASC`
    FewestWorkers,
}

/// 一次原子领取请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub filter: ClaimFilter,
    pub order: ClaimOrder,
    pub lease: WorkerLease,
}

/// 分区租约存储接口
///
/// 所有共享状态都由实现方保存。`atomic_claim` 与 `atomic_release` 必须是不可分割的
/// 读-改-写操作，分区容量上限完全依赖于此。
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// 创建分区，键已存在时返回 `PartitionExists`
    async fn create_partition(&self, config: &PartitionConfiguration) -> WorkinatorResult<()>;

    /// 按过滤条件和排序选出一个分区，并在同一原子步骤内追加租约、
    /// 递增 `worker_count` 与 `assignment_count`、刷新 `last_checked_date`
    ///
    /// 没有匹配的分区时返回 `None`。
    async fn atomic_claim(&self, request: &ClaimRequest) -> WorkinatorResult<Option<PartitionInfo>>;

    /// 移除 `assignee` 在该分区上的租约，并设置
    /// `due_date = released_at + max_idle_time_seconds`
    ///
    /// 分区或租约不存在时不做任何事。
    async fn atomic_release(
        &self,
        partition_key: &str,
        assignee: &str,
        released_at: DateTime<Utc>,
    ) -> WorkinatorResult<()>;

    /// 按分区键排序列出全部分区
    async fn list_partitions(&self) -> WorkinatorResult<Vec<PartitionInfo>>;

    async fn get_partition(&self, partition_key: &str) -> WorkinatorResult<Option<PartitionInfo>>;

    /// 设置分区的外部 `has_work` 标记
    async fn set_has_work(&self, partition_key: &str, has_work: bool) -> WorkinatorResult<()>;

    async fn set_due_date(
        &self,
        partition_key: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> WorkinatorResult<()>;

    /// 保存消费者注册，消费者ID已存在时返回 `ConsumerExists`
    async fn insert_consumer(&self, registration: &ConsumerRegistration) -> WorkinatorResult<()>;

    async fn delete_consumer(&self, registration: &ConsumerRegistration) -> WorkinatorResult<()>;

    async fn list_consumers(&self) -> WorkinatorResult<Vec<ConsumerRegistration>>;

    /// 按assignee覆盖保存最新的Worker状态
    async fn save_worker_statuses(
        &self,
        statuses: &[WorkerStatus],
        reported_at: DateTime<Utc>,
    ) -> WorkinatorResult<()>;

    async fn list_worker_statuses(&self) -> WorkinatorResult<Vec<WorkerStatusRecord>>;
}
