use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use workinator_core::{
    ClaimFilter, ClaimOrder, ClaimRequest, ConsumerId, ConsumerRegistration, LeaseStore,
    PartitionConfiguration, PartitionInfo, WorkerStatus, WorkerStatusRecord, WorkinatorError,
    WorkinatorResult,
};

use crate::database::mapping::MappingHelpers;

/// 基于 SQLite 的租约存储
///
/// 领取通过单条 `UPDATE ... WHERE partition_key = (SELECT ... LIMIT 1) RETURNING *`
/// 完成，选择与修改在同一条语句中，SQLite 的写锁保证了并发领取互斥。
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn filter_clause(filter: &ClaimFilter) -> &'static str {
        match filter {
            ClaimFilter::DueAndIdle { .. } => {
                "worker_count = 0 AND due_date IS NOT NULL AND due_date < ?4"
            }
            ClaimFilter::HasWorkWithCapacity => "has_work = 1 AND worker_count < max_worker_count",
            ClaimFilter::Idle => "worker_count = 0",
        }
    }

    fn order_clause(order: ClaimOrder) -> &'static str {
        match order {
            ClaimOrder::LeastRecentlyChecked => {
                "last_checked_date IS NOT NULL, last_checked_date, partition_key"
            }
            ClaimOrder::FewestWorkers => {
                "worker_count, last_checked_date IS NOT NULL, last_checked_date, partition_key"
            }
        }
    }

    fn row_to_status(row: &sqlx::sqlite::SqliteRow) -> WorkinatorResult<WorkerStatusRecord> {
        Ok(WorkerStatusRecord {
            assignee: row.try_get("assignee")?,
            consumer_id: row.try_get("consumer_id")?,
            partition_key: row.try_get("partition_key")?,
            rule: row.try_get("rule")?,
            has_work: row.try_get("has_work")?,
            reported_at: MappingHelpers::from_millis(row.try_get("reported_at")?)?,
        })
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn create_partition(&self, config: &PartitionConfiguration) -> WorkinatorResult<()> {
        let created_at = MappingHelpers::to_millis(Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO partitions (partition_key, max_worker_count, max_idle_time_seconds, due_date, created_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(partition_key) DO NOTHING
            "#,
        )
        .bind(&config.partition_key)
        .bind(config.max_worker_count)
        .bind(config.max_idle_time_seconds)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(WorkinatorError::Database)?;

        if result.rows_affected() == 0 {
            return Err(WorkinatorError::PartitionExists {
                partition_key: config.partition_key.clone(),
            });
        }

        debug!("创建分区成功: {}", config.partition_key);
        Ok(())
    }

    async fn atomic_claim(&self, request: &ClaimRequest) -> WorkinatorResult<Option<PartitionInfo>> {
        let sql = format!(
            r#"
            UPDATE partitions SET
                workers = json_insert(workers, '$[#]', json_object('assignee', ?1, 'insert_date', ?2, 'rule', ?3)),
                worker_count = worker_count + 1,
                assignment_count = assignment_count + 1,
                last_checked_date = ?2
            WHERE partition_key = (
                SELECT partition_key FROM partitions
                WHERE {}
                ORDER BY {}
                LIMIT 1
            )
            RETURNING *
            "#,
            Self::filter_clause(&request.filter),
            Self::order_clause(request.order),
        );

        let mut query = sqlx::query(&sql)
            .bind(&request.lease.assignee)
            .bind(MappingHelpers::to_millis(request.lease.insert_date))
            .bind(&request.lease.rule);
        if let ClaimFilter::DueAndIdle { now } = request.filter {
            query = query.bind(MappingHelpers::to_millis(now));
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(WorkinatorError::Database)?;

        match row {
            Some(row) => {
                let partition = MappingHelpers::row_to_partition(&row)?;
                debug!(
                    "领取分区: partition={}, assignee={}, rule={}",
                    partition.partition_key, request.lease.assignee, request.lease.rule
                );
                Ok(Some(partition))
            }
            None => Ok(None),
        }
    }

    async fn atomic_release(
        &self,
        partition_key: &str,
        assignee: &str,
        released_at: DateTime<Utc>,
    ) -> WorkinatorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE partitions SET
                workers = (
                    SELECT json_group_array(json(value)) FROM json_each(partitions.workers)
                    WHERE json_extract(value, '$.assignee') <> ?2
                ),
                worker_count = (
                    SELECT COUNT(*) FROM json_each(partitions.workers)
                    WHERE json_extract(value, '$.assignee') <> ?2
                ),
                due_date = ?3 + max_idle_time_seconds * 1000,
                last_checked_date = ?3
            WHERE partition_key = ?1
              AND EXISTS (
                  SELECT 1 FROM json_each(partitions.workers)
                  WHERE json_extract(value, '$.assignee') = ?2
              )
            "#,
        )
        .bind(partition_key)
        .bind(assignee)
        .bind(MappingHelpers::to_millis(released_at))
        .execute(&self.pool)
        .await
        .map_err(WorkinatorError::Database)?;

        if result.rows_affected() == 0 {
            debug!(
                "分区 {} 上没有 {} 的租约，忽略释放",
                partition_key, assignee
            );
        } else {
            debug!("释放分区: partition={}, assignee={}", partition_key, assignee);
        }
        Ok(())
    }

    async fn list_partitions(&self) -> WorkinatorResult<Vec<PartitionInfo>> {
        let rows = sqlx::query("SELECT * FROM partitions ORDER BY partition_key")
            .fetch_all(&self.pool)
            .await
            .map_err(WorkinatorError::Database)?;

        rows.iter().map(MappingHelpers::row_to_partition).collect()
    }

    async fn get_partition(&self, partition_key: &str) -> WorkinatorResult<Option<PartitionInfo>> {
        let row = sqlx::query("SELECT * FROM partitions WHERE partition_key = ?1")
            .bind(partition_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(WorkinatorError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_partition).transpose()
    }

    async fn set_has_work(&self, partition_key: &str, has_work: bool) -> WorkinatorResult<()> {
        let result = sqlx::query("UPDATE partitions SET has_work = ?1 WHERE partition_key = ?2")
            .bind(has_work)
            .bind(partition_key)
            .execute(&self.pool)
            .await
            .map_err(WorkinatorError::Database)?;

        if result.rows_affected() == 0 {
            return Err(WorkinatorError::PartitionNotFound {
                partition_key: partition_key.to_string(),
            });
        }
        Ok(())
    }

    async fn set_due_date(
        &self,
        partition_key: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> WorkinatorResult<()> {
        let result = sqlx::query("UPDATE partitions SET due_date = ?1 WHERE partition_key = ?2")
            .bind(due_date.map(MappingHelpers::to_millis))
            .bind(partition_key)
            .execute(&self.pool)
            .await
            .map_err(WorkinatorError::Database)?;

        if result.rows_affected() == 0 {
            return Err(WorkinatorError::PartitionNotFound {
                partition_key: partition_key.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_consumer(&self, registration: &ConsumerRegistration) -> WorkinatorResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO consumers (consumer_id, receipt, registered_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(consumer_id) DO NOTHING
            "#,
        )
        .bind(registration.consumer_id.name())
        .bind(&registration.receipt)
        .bind(MappingHelpers::to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(WorkinatorError::Database)?;

        if result.rows_affected() == 0 {
            return Err(WorkinatorError::ConsumerExists {
                consumer_id: registration.consumer_id.to_string(),
            });
        }

        debug!("注册消费者成功: {}", registration.consumer_id);
        Ok(())
    }

    async fn delete_consumer(&self, registration: &ConsumerRegistration) -> WorkinatorResult<()> {
        sqlx::query("DELETE FROM consumers WHERE consumer_id = ?1 AND receipt = ?2")
            .bind(registration.consumer_id.name())
            .bind(&registration.receipt)
            .execute(&self.pool)
            .await
            .map_err(WorkinatorError::Database)?;

        debug!("注销消费者: {}", registration.consumer_id);
        Ok(())
    }

    async fn list_consumers(&self) -> WorkinatorResult<Vec<ConsumerRegistration>> {
        let rows = sqlx::query("SELECT consumer_id, receipt FROM consumers ORDER BY consumer_id")
            .fetch_all(&self.pool)
            .await
            .map_err(WorkinatorError::Database)?;

        rows.iter()
            .map(|row| {
                let consumer_id: String = row.try_get("consumer_id")?;
                let receipt: String = row.try_get("receipt")?;
                Ok(ConsumerRegistration::new(ConsumerId::new(consumer_id), receipt))
            })
            .collect()
    }

    async fn save_worker_statuses(
        &self,
        statuses: &[WorkerStatus],
        reported_at: DateTime<Utc>,
    ) -> WorkinatorResult<()> {
        let mut tx = self.pool.begin().await.map_err(WorkinatorError::Database)?;

        for status in statuses {
            let record = WorkerStatusRecord::from_status(status, reported_at);
            sqlx::query(
                r#"
                INSERT INTO worker_statuses (assignee, consumer_id, partition_key, rule, has_work, reported_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(assignee) DO UPDATE SET
                    consumer_id = excluded.consumer_id,
                    partition_key = excluded.partition_key,
                    rule = excluded.rule,
                    has_work = excluded.has_work,
                    reported_at = excluded.reported_at
                "#,
            )
            .bind(&record.assignee)
            .bind(&record.consumer_id)
            .bind(&record.partition_key)
            .bind(&record.rule)
            .bind(record.has_work)
            .bind(MappingHelpers::to_millis(record.reported_at))
            .execute(&mut *tx)
            .await
            .map_err(WorkinatorError::Database)?;
        }

        tx.commit().await.map_err(WorkinatorError::Database)?;
        Ok(())
    }

    async fn list_worker_statuses(&self) -> WorkinatorResult<Vec<WorkerStatusRecord>> {
        let rows = sqlx::query("SELECT * FROM worker_statuses ORDER BY assignee")
            .fetch_all(&self.pool)
            .await
            .map_err(WorkinatorError::Database)?;

        rows.iter().map(Self::row_to_status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use chrono::Duration;
    use workinator_core::{DatabaseConfig, WorkerId, WorkerLease};

    async fn setup_test_db() -> SqliteLeaseStore {
        let manager = DatabaseManager::new(&DatabaseConfig::default()).await.unwrap();
        manager.migrate().await.unwrap();
        SqliteLeaseStore::new(manager.pool().clone())
    }

    fn create_test_lease(assignee: &str) -> WorkerLease {
        WorkerLease {
            assignee: assignee.to_string(),
            insert_date: Utc::now(),
            rule: "any-idle".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_partition_conflict() {
        let store = setup_test_db().await;
        let config = PartitionConfiguration::new("p1").with_max_worker_count(3);
        store.create_partition(&config).await.unwrap();

        let result = store.create_partition(&config).await;
        assert!(matches!(result, Err(WorkinatorError::PartitionExists { .. })));

        let partition = store.get_partition("p1").await.unwrap().unwrap();
        assert_eq!(partition.max_worker_count, 3);
        assert_eq!(partition.worker_count, 0);
        assert!(partition.workers.is_empty());
        assert_eq!(partition.due_date, Some(partition.created_at));
    }

    #[tokio::test]
    async fn test_claim_appends_lease_and_counts() {
        let store = setup_test_db().await;
        store
            .create_partition(&PartitionConfiguration::new("p1"))
            .await
            .unwrap();

        let request = ClaimRequest {
            filter: ClaimFilter::Idle,
            order: ClaimOrder::LeastRecentlyChecked,
            lease: create_test_lease("c1:r:0"),
        };
        let claimed = store.atomic_claim(&request).await.unwrap().unwrap();
        assert_eq!(claimed.worker_count, 1);
        assert_eq!(claimed.assignment_count, 1);
        assert_eq!(claimed.workers.len(), 1);
        assert_eq!(claimed.workers[0].assignee, "c1:r:0");
        assert!(claimed.last_checked_date.is_some());

        // 唯一的分区已被占用
        assert!(store.atomic_claim(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_filter_respects_due_date() {
        let store = setup_test_db().await;
        store
            .create_partition(&PartitionConfiguration::new("p1"))
            .await
            .unwrap();
        store
            .set_due_date("p1", Some(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let request = ClaimRequest {
            filter: ClaimFilter::DueAndIdle { now: Utc::now() },
            order: ClaimOrder::LeastRecentlyChecked,
            lease: create_test_lease("c1:r:0"),
        };
        assert!(store.atomic_claim(&request).await.unwrap().is_none());

        store.set_due_date("p1", None).await.unwrap();
        assert!(store.atomic_claim(&request).await.unwrap().is_none());

        store
            .set_due_date("p1", Some(Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();
        assert!(store.atomic_claim(&request).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_removes_all_leases_of_assignee() {
        let store = setup_test_db().await;
        store
            .create_partition(&PartitionConfiguration::new("p1").with_max_worker_count(3))
            .await
            .unwrap();
        store.set_has_work("p1", true).await.unwrap();

        for assignee in ["a", "b"] {
            let request = ClaimRequest {
                filter: ClaimFilter::HasWorkWithCapacity,
                order: ClaimOrder::FewestWorkers,
                lease: create_test_lease(assignee),
            };
            store.atomic_claim(&request).await.unwrap().unwrap();
        }

        let released_at = Utc::now();
        store.atomic_release("p1", "a", released_at).await.unwrap();

        let partition = store.get_partition("p1").await.unwrap().unwrap();
        assert_eq!(partition.worker_count, 1);
        assert_eq!(partition.workers.len(), 1);
        assert_eq!(partition.workers[0].assignee, "b");
        assert_eq!(
            partition.due_date.unwrap().timestamp_millis(),
            (released_at + Duration::seconds(60)).timestamp_millis()
        );

        // 没有租约时释放不修改任何字段
        store.atomic_release("p1", "a", Utc::now()).await.unwrap();
        let unchanged = store.get_partition("p1").await.unwrap().unwrap();
        assert_eq!(unchanged, partition);
    }

    #[tokio::test]
    async fn test_set_has_work_missing_partition() {
        let store = setup_test_db().await;
        let result = store.set_has_work("missing", true).await;
        assert!(matches!(result, Err(WorkinatorError::PartitionNotFound { .. })));
    }

    #[tokio::test]
    async fn test_consumer_registration_is_unique() {
        let store = setup_test_db().await;
        let first = ConsumerRegistration::new(ConsumerId::new("c1"), "r1");
        store.insert_consumer(&first).await.unwrap();

        let second = ConsumerRegistration::new(ConsumerId::new("c1"), "r2");
        let result = store.insert_consumer(&second).await;
        assert!(matches!(result, Err(WorkinatorError::ConsumerExists { .. })));

        store.delete_consumer(&second).await.unwrap();
        assert_eq!(store.list_consumers().await.unwrap(), vec![first.clone()]);

        store.delete_consumer(&first).await.unwrap();
        assert!(store.list_consumers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_statuses_are_upserted() {
        let store = setup_test_db().await;
        let worker_id = WorkerId::new(ConsumerRegistration::new(ConsumerId::new("c1"), "r1"), 0);
        let mut status = WorkerStatus::new(worker_id);

        store.save_worker_statuses(&[status.clone()], Utc::now()).await.unwrap();
        status.has_work = true;
        store.save_worker_statuses(&[status], Utc::now()).await.unwrap();

        let records = store.list_worker_statuses().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].assignee, "c1:r1:0");
        assert!(records[0].has_work);
        assert!(records[0].partition_key.is_none());
    }
}
