use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 默认每个分区允许的最大Worker数
pub const DEFAULT_MAX_WORKER_COUNT: i32 = 1;

/// 默认最大空闲时间（秒）
pub const DEFAULT_MAX_IDLE_TIME_SECONDS: i64 = 60;

/// 创建分区时使用的配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfiguration {
    pub partition_key: String,
    pub max_worker_count: i32,
    /// 分区释放后多久再次到期
    pub max_idle_time_seconds: i64,
}

impl PartitionConfiguration {
    /// 使用默认容量和空闲时间创建分区配置
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            max_worker_count: DEFAULT_MAX_WORKER_COUNT,
            max_idle_time_seconds: DEFAULT_MAX_IDLE_TIME_SECONDS,
        }
    }

    pub fn with_max_worker_count(mut self, max_worker_count: i32) -> Self {
        self.max_worker_count = max_worker_count;
        self
    }

    pub fn with_max_idle_time_seconds(mut self, max_idle_time_seconds: i64) -> Self {
        self.max_idle_time_seconds = max_idle_time_seconds;
        self
    }
}

/// 分区上的一条租约
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLease {
    /// 持有租约的Worker标识，见 [`crate::WorkerId::assignee`]
    pub assignee: String,
    pub insert_date: DateTime<Utc>,
    /// 授予该租约的规则名称
    pub rule: String,
}

/// 分区信息
///
/// `worker_count` 始终等于 `workers.len()`，容量上限只由领取规则的过滤条件保证。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub partition_key: String,
    pub max_worker_count: i32,
    pub max_idle_time_seconds: i64,
    pub worker_count: i32,
    pub assignment_count: i64,
    pub due_date: Option<DateTime<Utc>>,
    pub last_checked_date: Option<DateTime<Utc>>,
    pub has_work: bool,
    pub workers: Vec<WorkerLease>,
    pub created_at: DateTime<Utc>,
}

impl PartitionInfo {
    /// 根据配置创建新分区，新分区立即到期
    pub fn new(config: &PartitionConfiguration, created_at: DateTime<Utc>) -> Self {
        Self {
            partition_key: config.partition_key.clone(),
            max_worker_count: config.max_worker_count,
            max_idle_time_seconds: config.max_idle_time_seconds,
            worker_count: 0,
            assignment_count: 0,
            due_date: Some(created_at),
            last_checked_date: None,
            has_work: false,
            workers: Vec::new(),
            created_at,
        }
    }

    /// 没有任何Worker持有租约
    pub fn is_idle(&self) -> bool {
        self.worker_count == 0
    }

    /// 空闲并且已经到期
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_idle() && self.due_date.is_some_and(|due| due < now)
    }

    /// 是否还能接纳更多Worker
    pub fn has_capacity(&self) -> bool {
        self.worker_count < self.max_worker_count
    }

    pub fn is_leased_by(&self, assignee: &str) -> bool {
        self.workers.iter().any(|lease| lease.assignee == assignee)
    }
}
