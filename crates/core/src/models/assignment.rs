use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkerId;

/// 分区分配结果
///
/// 分配只是一个凭证，释放时通过相同的 `(worker_id, partition_key)` 再次调用协调器。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub worker_id: WorkerId,
    pub partition_key: String,
    /// 存储层对分区的引用，仅用于诊断
    pub partition_ref: String,
    /// 授予该分配的规则名称
    pub rule: String,
}

impl Assignment {
    pub fn is_same_partition(&self, other: &Assignment) -> bool {
        self.partition_key == other.partition_key
    }
}

/// 执行器自报的Worker状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub has_work: bool,
    pub current_assignment: Option<Assignment>,
}

impl WorkerStatus {
    /// 尚未持有任何分区的新Worker
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            has_work: false,
            current_assignment: None,
        }
    }
}

/// 最近一次上报的Worker状态，用于集群可观测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatusRecord {
    pub assignee: String,
    pub consumer_id: String,
    pub partition_key: Option<String>,
    pub rule: Option<String>,
    pub has_work: bool,
    pub reported_at: DateTime<Utc>,
}

impl WorkerStatusRecord {
    pub fn from_status(status: &WorkerStatus, reported_at: DateTime<Utc>) -> Self {
        Self {
            assignee: status.worker_id.assignee(),
            consumer_id: status.worker_id.registration.consumer_id.to_string(),
            partition_key: status
                .current_assignment
                .as_ref()
                .map(|a| a.partition_key.clone()),
            rule: status.current_assignment.as_ref().map(|a| a.rule.clone()),
            has_work: status.has_work,
            reported_at,
        }
    }
}
