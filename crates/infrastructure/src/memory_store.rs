use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use workinator_core::{
    ClaimOrder, ClaimRequest, ConsumerRegistration, LeaseStore,
    PartitionConfiguration, PartitionInfo, WorkerStatus, WorkerStatusRecord, WorkinatorError,
    WorkinatorResult,
};

#[derive(Debug, Default)]
struct MemoryState {
    /// 按分区键有序，排序并列时按键取第一个
    partitions: BTreeMap<String, PartitionInfo>,
    consumers: HashMap<String, ConsumerRegistration>,
    worker_statuses: BTreeMap<String, WorkerStatusRecord>,
}

/// 内存租约存储
///
/// 整个状态由一把互斥锁保护，每个操作天然是原子的。只适用于单进程部署和测试，
/// 多进程共享状态需要使用数据库实现。
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    state: Mutex<MemoryState>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn order_key(order: ClaimOrder, partition: &PartitionInfo) -> (i32, Option<DateTime<Utc>>) {
        match order {
            ClaimOrder::LeastRecentlyChecked => (0, partition.last_checked_date),
            ClaimOrder::FewestWorkers => (partition.worker_count, partition.last_checked_date),
        }
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn create_partition(&self, config: &PartitionConfiguration) -> WorkinatorResult<()> {
        let mut state = self.state.lock().await;
        if state.partitions.contains_key(&config.partition_key) {
            return Err(WorkinatorError::PartitionExists {
                partition_key: config.partition_key.clone(),
            });
        }

        state.partitions.insert(
            config.partition_key.clone(),
            PartitionInfo::new(config, Utc::now()),
        );
        debug!("创建分区成功: {}", config.partition_key);
        Ok(())
    }

    async fn atomic_claim(&self, request: &ClaimRequest) -> WorkinatorResult<Option<PartitionInfo>> {
        let mut state = self.state.lock().await;

        let selected = state
            .partitions
            .values()
            .filter(|partition| request.filter.matches(partition))
            .min_by_key(|partition| Self::order_key(request.order, partition))
            .map(|partition| partition.partition_key.clone());

        let Some(partition_key) = selected else {
            return Ok(None);
        };

        let partition = state
            .partitions
            .get_mut(&partition_key)
            .ok_or_else(|| WorkinatorError::Internal(format!("分区在锁内消失: {partition_key}")))?;

        partition.workers.push(request.lease.clone());
        partition.worker_count += 1;
        partition.assignment_count += 1;
        partition.last_checked_date = Some(request.lease.insert_date);

        debug!(
            "领取分区: partition={}, assignee={}, rule={}",
            partition_key, request.lease.assignee, request.lease.rule
        );
        Ok(Some(partition.clone()))
    }

    async fn atomic_release(
        &self,
        partition_key: &str,
        assignee: &str,
        released_at: DateTime<Utc>,
    ) -> WorkinatorResult<()> {
        let mut state = self.state.lock().await;
        let Some(partition) = state.partitions.get_mut(partition_key) else {
            debug!("释放不存在的分区，忽略: {}", partition_key);
            return Ok(());
        };

        if !partition.is_leased_by(assignee) {
            debug!(
                "分区 {} 上没有 {} 的租约，忽略释放",
                partition_key, assignee
            );
            return Ok(());
        }

        partition.workers.retain(|lease| lease.assignee != assignee);
        partition.worker_count = partition.workers.len() as i32;
        partition.due_date = Some(released_at + Duration::seconds(partition.max_idle_time_seconds));
        partition.last_checked_date = Some(released_at);

        debug!("释放分区: partition={}, assignee={}", partition_key, assignee);
        Ok(())
    }

    async fn list_partitions(&self) -> WorkinatorResult<Vec<PartitionInfo>> {
        let state = self.state.lock().await;
        Ok(state.partitions.values().cloned().collect())
    }

    async fn get_partition(&self, partition_key: &str) -> WorkinatorResult<Option<PartitionInfo>> {
        let state = self.state.lock().await;
        Ok(state.partitions.get(partition_key).cloned())
    }

    async fn set_has_work(&self, partition_key: &str, has_work: bool) -> WorkinatorResult<()> {
        let mut state = self.state.lock().await;
        let partition = state.partitions.get_mut(partition_key).ok_or_else(|| {
            WorkinatorError::PartitionNotFound {
                partition_key: partition_key.to_string(),
            }
        })?;
        partition.has_work = has_work;
        Ok(())
    }

    async fn set_due_date(
        &self,
        partition_key: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> WorkinatorResult<()> {
        let mut state = self.state.lock().await;
        let partition = state.partitions.get_mut(partition_key).ok_or_else(|| {
            WorkinatorError::PartitionNotFound {
                partition_key: partition_key.to_string(),
            }
        })?;
        partition.due_date = due_date;
        Ok(())
    }

    async fn insert_consumer(&self, registration: &ConsumerRegistration) -> WorkinatorResult<()> {
        let mut state = self.state.lock().await;
        let consumer_id = registration.consumer_id.name().to_string();
        if state.consumers.contains_key(&consumer_id) {
            return Err(WorkinatorError::ConsumerExists { consumer_id });
        }
        state.consumers.insert(consumer_id, registration.clone());
        Ok(())
    }

    async fn delete_consumer(&self, registration: &ConsumerRegistration) -> WorkinatorResult<()> {
        let mut state = self.state.lock().await;
        let consumer_id = registration.consumer_id.name();
        // 只删除同一个receipt的注册，避免误删同名的新注册
        if state
            .consumers
            .get(consumer_id)
            .is_some_and(|existing| existing.receipt == registration.receipt)
        {
            state.consumers.remove(consumer_id);
        }
        Ok(())
    }

    async fn list_consumers(&self) -> WorkinatorResult<Vec<ConsumerRegistration>> {
        let state = self.state.lock().await;
        let mut consumers: Vec<_> = state.consumers.values().cloned().collect();
        consumers.sort_by(|a, b| a.consumer_id.name().cmp(b.consumer_id.name()));
        Ok(consumers)
    }

    async fn save_worker_statuses(
        &self,
        statuses: &[WorkerStatus],
        reported_at: DateTime<Utc>,
    ) -> WorkinatorResult<()> {
        let mut state = self.state.lock().await;
        for status in statuses {
            let record = WorkerStatusRecord::from_status(status, reported_at);
            state.worker_statuses.insert(record.assignee.clone(), record);
        }
        Ok(())
    }

    async fn list_worker_statuses(&self) -> WorkinatorResult<Vec<WorkerStatusRecord>> {
        let state = self.state.lock().await;
        Ok(state.worker_statuses.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workinator_core::{ClaimFilter, WorkerLease};

    fn lease(assignee: &str, rule: &str) -> WorkerLease {
        WorkerLease {
            assignee: assignee.to_string(),
            insert_date: Utc::now(),
            rule: rule.to_string(),
        }
    }

    #[tokio::test]
    async fn test_claim_prefers_never_checked_partition() {
        let store = InMemoryLeaseStore::new();
        store
            .create_partition(&PartitionConfiguration::new("a"))
            .await
            .unwrap();
        store
            .create_partition(&PartitionConfiguration::new("b"))
            .await
            .unwrap();

        let request = ClaimRequest {
            filter: ClaimFilter::Idle,
            order: ClaimOrder::LeastRecentlyChecked,
            lease: lease("w1", "any-idle"),
        };
        let first = store.atomic_claim(&request).await.unwrap().unwrap();
        store
            .atomic_release(&first.partition_key, "w1", Utc::now())
            .await
            .unwrap();

        // a 刚被检查过，b 从未被检查过
        let second = store.atomic_claim(&request).await.unwrap().unwrap();
        assert_eq!(first.partition_key, "a");
        assert_eq!(second.partition_key, "b");
    }

    #[tokio::test]
    async fn test_release_without_lease_is_noop() {
        let store = InMemoryLeaseStore::new();
        store
            .create_partition(&PartitionConfiguration::new("a"))
            .await
            .unwrap();
        let before = store.get_partition("a").await.unwrap().unwrap();

        store.atomic_release("a", "nobody", Utc::now()).await.unwrap();
        store.atomic_release("missing", "nobody", Utc::now()).await.unwrap();

        let after = store.get_partition("a").await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_delete_consumer_requires_matching_receipt() {
        let store = InMemoryLeaseStore::new();
        let registration =
            ConsumerRegistration::new(workinator_core::ConsumerId::new("c1"), "r1");
        store.insert_consumer(&registration).await.unwrap();

        let stale = ConsumerRegistration::new(workinator_core::ConsumerId::new("c1"), "r0");
        store.delete_consumer(&stale).await.unwrap();
        assert_eq!(store.list_consumers().await.unwrap().len(), 1);

        store.delete_consumer(&registration).await.unwrap();
        assert!(store.list_consumers().await.unwrap().is_empty());
    }
}
