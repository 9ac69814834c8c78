use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use workinator_core::{
    AsyncWorker, LeaseStore, WorkerContext, WorkerFactory, WorkerId, WorkinatorResult,
};

/// 演示用工作回调：`has_work` 跟随分区上存储的外部标记
pub struct DemoWorker {
    worker_id: WorkerId,
    store: Arc<dyn LeaseStore>,
    work_delay: Duration,
}

#[async_trait]
impl AsyncWorker for DemoWorker {
    async fn execute(&self, context: &mut WorkerContext) -> WorkinatorResult<()> {
        let has_work = self
            .store
            .get_partition(context.partition_key())
            .await?
            .is_some_and(|partition| partition.has_work);

        info!(
            worker = %self.worker_id,
            partition = context.partition_key(),
            rule = %context.assignment().rule,
            has_work,
            "处理分区"
        );
        tokio::time::sleep(self.work_delay).await;

        context.set_has_work(has_work);
        Ok(())
    }
}

pub struct DemoWorkerFactory {
    store: Arc<dyn LeaseStore>,
    work_delay: Duration,
}

impl DemoWorkerFactory {
    pub fn new(store: Arc<dyn LeaseStore>, work_delay: Duration) -> Self {
        Self { store, work_delay }
    }
}

impl WorkerFactory for DemoWorkerFactory {
    fn create_worker(&self, worker_id: &WorkerId) -> WorkinatorResult<Arc<dyn AsyncWorker>> {
        Ok(Arc::new(DemoWorker {
            worker_id: worker_id.clone(),
            store: Arc::clone(&self.store),
            work_delay: self.work_delay,
        }))
    }
}
