use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use workinator_core::{
    Assignment, ClaimFilter, ClaimOrder, ClaimRequest, LeaseStore, WorkerLease, WorkerStatus,
    WorkinatorResult,
};

pub const DUE_AND_IDLE_RULE: &str = "due-and-idle";
pub const KEEP_CURRENT_RULE: &str = "keep-current";
pub const LOAD_BALANCE_RULE: &str = "load-balance";
pub const ANY_IDLE_RULE: &str = "any-idle";

/// 分配规则
///
/// 返回 `Some` 表示本规则给出了分配，规则链就此结束。
#[async_trait]
pub trait AssignmentRule: Send + Sync {
    async fn evaluate(
        &self,
        status: &WorkerStatus,
        now: DateTime<Utc>,
    ) -> WorkinatorResult<Option<Assignment>>;

    fn name(&self) -> &str;
}

/// 通过一次原子领取构造分配
async fn claim(
    store: &dyn LeaseStore,
    status: &WorkerStatus,
    now: DateTime<Utc>,
    filter: ClaimFilter,
    order: ClaimOrder,
    rule: &str,
) -> WorkinatorResult<Option<Assignment>> {
    let request = ClaimRequest {
        filter,
        order,
        lease: WorkerLease {
            assignee: status.worker_id.assignee(),
            insert_date: now,
            rule: rule.to_string(),
        },
    };

    let Some(partition) = store.atomic_claim(&request).await? else {
        return Ok(None);
    };

    Ok(Some(Assignment {
        worker_id: status.worker_id.clone(),
        partition_ref: format!("{}#{}", partition.partition_key, partition.assignment_count),
        partition_key: partition.partition_key,
        rule: rule.to_string(),
    }))
}

/// 规则1：到期且无人处理的分区，最久未检查的优先
///
/// 仍有工作的Worker不会被到期分区抢走，交给规则2保持当前分配。
pub struct DueAndIdleRule {
    store: Arc<dyn LeaseStore>,
}

impl DueAndIdleRule {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AssignmentRule for DueAndIdleRule {
    async fn evaluate(
        &self,
        status: &WorkerStatus,
        now: DateTime<Utc>,
    ) -> WorkinatorResult<Option<Assignment>> {
        if status.has_work && status.current_assignment.is_some() {
            return Ok(None);
        }

        claim(
            self.store.as_ref(),
            status,
            now,
            ClaimFilter::DueAndIdle { now },
            ClaimOrder::LeastRecentlyChecked,
            DUE_AND_IDLE_RULE,
        )
        .await
    }

    fn name(&self) -> &str {
        DUE_AND_IDLE_RULE
    }
}

/// 规则2：当前分区还有工作时继续持有，不访问存储
pub struct KeepCurrentRule;

impl KeepCurrentRule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KeepCurrentRule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssignmentRule for KeepCurrentRule {
    async fn evaluate(
        &self,
        status: &WorkerStatus,
        _now: DateTime<Utc>,
    ) -> WorkinatorResult<Option<Assignment>> {
        match &status.current_assignment {
            Some(current) if status.has_work => {
                debug!(
                    "Worker {} 继续处理分区 {}",
                    status.worker_id, current.partition_key
                );
                Ok(Some(current.clone()))
            }
            _ => Ok(None),
        }
    }

    fn name(&self) -> &str {
        KEEP_CURRENT_RULE
    }
}

/// 规则3：有工作且未满的分区，当前Worker最少的优先
pub struct LoadBalanceRule {
    store: Arc<dyn LeaseStore>,
}

impl LoadBalanceRule {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AssignmentRule for LoadBalanceRule {
    async fn evaluate(
        &self,
        status: &WorkerStatus,
        now: DateTime<Utc>,
    ) -> WorkinatorResult<Option<Assignment>> {
        claim(
            self.store.as_ref(),
            status,
            now,
            ClaimFilter::HasWorkWithCapacity,
            ClaimOrder::FewestWorkers,
            LOAD_BALANCE_RULE,
        )
        .await
    }

    fn name(&self) -> &str {
        LOAD_BALANCE_RULE
    }
}

/// 规则4：任意空闲分区，最久未检查的优先
pub struct AnyIdleRule {
    store: Arc<dyn LeaseStore>,
}

impl AnyIdleRule {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AssignmentRule for AnyIdleRule {
    async fn evaluate(
        &self,
        status: &WorkerStatus,
        now: DateTime<Utc>,
    ) -> WorkinatorResult<Option<Assignment>> {
        claim(
            self.store.as_ref(),
            status,
            now,
            ClaimFilter::Idle,
            ClaimOrder::LeastRecentlyChecked,
            ANY_IDLE_RULE,
        )
        .await
    }

    fn name(&self) -> &str {
        ANY_IDLE_RULE
    }
}
