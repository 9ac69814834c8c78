use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use workinator_core::{
    Assignment, ClaimRequest, ConsumerId, ConsumerRegistration, LeaseStore,
    PartitionConfiguration, PartitionInfo, WorkerId, WorkerStatus, WorkerStatusRecord,
    WorkinatorError, WorkinatorResult,
};
use workinator_infrastructure::InMemoryLeaseStore;

pub fn create_test_status(consumer_id: &str, slot: usize) -> WorkerStatus {
    let registration = ConsumerRegistration::new(ConsumerId::new(consumer_id), "test-receipt");
    WorkerStatus::new(WorkerId::new(registration, slot))
}

pub fn create_test_assignment(status: &WorkerStatus, partition_key: &str) -> Assignment {
    Assignment {
        worker_id: status.worker_id.clone(),
        partition_key: partition_key.to_string(),
        partition_ref: format!("{partition_key}#1"),
        rule: "test".to_string(),
    }
}

/// 统计领取调用次数，并可模拟状态写入失败的存储
#[derive(Default)]
pub struct CountingLeaseStore {
    inner: InMemoryLeaseStore,
    claim_calls: AtomicUsize,
    fail_status_writes: AtomicBool,
}

impl CountingLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaseStore for CountingLeaseStore {
    async fn create_partition(&self, config: &PartitionConfiguration) -> WorkinatorResult<()> {
        self.inner.create_partition(config).await
    }

    async fn atomic_claim(&self, request: &ClaimRequest) -> WorkinatorResult<Option<PartitionInfo>> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.atomic_claim(request).await
    }

    async fn atomic_release(
        &self,
        partition_key: &str,
        assignee: &str,
        released_at: DateTime<Utc>,
    ) -> WorkinatorResult<()> {
        self.inner
            .atomic_release(partition_key, assignee, released_at)
            .await
    }

    async fn list_partitions(&self) -> WorkinatorResult<Vec<PartitionInfo>> {
        self.inner.list_partitions().await
    }

    async fn get_partition(&self, partition_key: &str) -> WorkinatorResult<Option<PartitionInfo>> {
        self.inner.get_partition(partition_key).await
    }

    async fn set_has_work(&self, partition_key: &str, has_work: bool) -> WorkinatorResult<()> {
        self.inner.set_has_work(partition_key, has_work).await
    }

    async fn set_due_date(
        &self,
        partition_key: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> WorkinatorResult<()> {
        self.inner.set_due_date(partition_key, due_date).await
    }

    async fn insert_consumer(&self, registration: &ConsumerRegistration) -> WorkinatorResult<()> {
        self.inner.insert_consumer(registration).await
    }

    async fn delete_consumer(&self, registration: &ConsumerRegistration) -> WorkinatorResult<()> {
        self.inner.delete_consumer(registration).await
    }

    async fn list_consumers(&self) -> WorkinatorResult<Vec<ConsumerRegistration>> {
        self.inner.list_consumers().await
    }

    async fn save_worker_statuses(
        &self,
        statuses: &[WorkerStatus],
        reported_at: DateTime<Utc>,
    ) -> WorkinatorResult<()> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(WorkinatorError::Internal("模拟状态写入失败".to_string()));
        }
        self.inner.save_worker_statuses(statuses, reported_at).await
    }

    async fn list_worker_statuses(&self) -> WorkinatorResult<Vec<WorkerStatusRecord>> {
        self.inner.list_worker_statuses().await
    }
}
