use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use workinator_core::{
    ConsumerId, ConsumerRegistration, Coordinator, DatabaseConfig, LeaseStore,
    PartitionConfiguration, WorkerId, WorkerStatus,
};
use workinator_dispatcher::{WorkinatorCoordinator, ANY_IDLE_RULE, LOAD_BALANCE_RULE};
use workinator_infrastructure::{DatabaseManager, InMemoryLeaseStore};

async fn create_test_coordinators() -> Vec<(&'static str, Arc<WorkinatorCoordinator>)> {
    let manager = DatabaseManager::new(&DatabaseConfig::default()).await.unwrap();
    manager.migrate().await.unwrap();

    let memory: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
    vec![
        ("memory", Arc::new(WorkinatorCoordinator::new(memory))),
        ("sqlite", Arc::new(WorkinatorCoordinator::new(manager.lease_store()))),
    ]
}

fn create_worker_status(consumer_id: &str, slot: usize) -> WorkerStatus {
    let registration = ConsumerRegistration::new(ConsumerId::new(consumer_id), "receipt");
    WorkerStatus::new(WorkerId::new(registration, slot))
}

#[tokio::test]
async fn test_two_workers_then_reclaim_released_partition() {
    for (name, coordinator) in create_test_coordinators().await {
        coordinator
            .create_partition(PartitionConfiguration::new("P1"))
            .await
            .unwrap();
        coordinator
            .create_partition(PartitionConfiguration::new("P2"))
            .await
            .unwrap();

        let first = create_worker_status("c1", 0);
        let second = create_worker_status("c1", 1);
        let (a, b) = tokio::join!(
            coordinator.get_assignment(&first),
            coordinator.get_assignment(&second)
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();

        let keys: HashSet<_> = [a.partition_key.clone(), b.partition_key.clone()].into();
        assert_eq!(keys, HashSet::from(["P1".to_string(), "P2".to_string()]), "{name}");

        let p1 = if a.partition_key == "P1" { a } else { b };
        coordinator.release_assignment(&p1).await.unwrap();

        let third = create_worker_status("c2", 0);
        let reclaimed = coordinator.get_assignment(&third).await.unwrap().unwrap();
        assert_eq!(reclaimed.partition_key, "P1", "{name}");
        assert_eq!(reclaimed.rule, ANY_IDLE_RULE, "{name}");
    }
}

#[tokio::test]
async fn test_concurrent_fresh_workers_get_distinct_partitions() {
    for (name, coordinator) in create_test_coordinators().await {
        for i in 0..6 {
            coordinator
                .create_partition(PartitionConfiguration::new(format!("p{i}")))
                .await
                .unwrap();
        }

        let handles = (0..6).map(|slot| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .get_assignment(&create_worker_status("c1", slot))
                    .await
                    .unwrap()
            })
        });
        let assignments: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let keys: HashSet<_> = assignments.iter().map(|a| a.partition_key.clone()).collect();
        assert_eq!(keys.len(), 6, "{name}");
    }
}

#[tokio::test]
async fn test_hot_partition_capacity_under_contention() {
    for (name, coordinator) in create_test_coordinators().await {
        coordinator
            .create_partition(PartitionConfiguration::new("hot").with_max_worker_count(3))
            .await
            .unwrap();
        coordinator.set_has_work("hot", true).await.unwrap();

        let handles = (0..10).map(|slot| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .get_assignment(&create_worker_status("c1", slot))
                    .await
                    .unwrap()
            })
        });
        let granted: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| joined.unwrap())
            .collect();

        assert_eq!(granted.len(), 3, "{name}");
        assert!(
            granted.iter().filter(|a| a.rule == LOAD_BALANCE_RULE).count() >= 2,
            "{name}"
        );

        let partitions = coordinator.list_partitions().await.unwrap();
        assert_eq!(partitions[0].worker_count, 3, "{name}");
        assert_eq!(partitions[0].workers.len(), 3, "{name}");
    }
}

#[tokio::test]
async fn test_exhausted_partitions_return_no_work() {
    for (name, coordinator) in create_test_coordinators().await {
        coordinator
            .create_partition(PartitionConfiguration::new("only"))
            .await
            .unwrap();

        assert!(coordinator
            .get_assignment(&create_worker_status("c1", 0))
            .await
            .unwrap()
            .is_some());
        assert!(
            coordinator
                .get_assignment(&create_worker_status("c1", 1))
                .await
                .unwrap()
                .is_none(),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_release_restores_count_and_sets_due_date() {
    for (name, coordinator) in create_test_coordinators().await {
        coordinator
            .create_partition(PartitionConfiguration::new("p1").with_max_idle_time_seconds(120))
            .await
            .unwrap();
        let before = coordinator.list_partitions().await.unwrap()[0].clone();

        let assignment = coordinator
            .get_assignment(&create_worker_status("c1", 0))
            .await
            .unwrap()
            .unwrap();
        let released_at = Utc::now();
        coordinator.release_assignment(&assignment).await.unwrap();

        let after = coordinator.list_partitions().await.unwrap()[0].clone();
        assert_eq!(after.worker_count, before.worker_count, "{name}");
        assert!(after.workers.is_empty(), "{name}");
        assert_eq!(after.assignment_count, 1, "{name}");

        let due = after.due_date.unwrap();
        let expected = released_at + Duration::seconds(120);
        assert!((due - expected).num_milliseconds().abs() < 1000, "{name}");

        // 重复释放是无操作
        coordinator.release_assignment(&assignment).await.unwrap();
        assert_eq!(coordinator.list_partitions().await.unwrap()[0], after, "{name}");
    }
}
