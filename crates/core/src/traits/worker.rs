use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{Assignment, WorkerId},
    WorkinatorResult,
};

/// 工作回调的执行上下文
#[derive(Debug, Clone)]
pub struct WorkerContext {
    assignment: Assignment,
    has_work: bool,
    assigned_at: DateTime<Utc>,
}

impl WorkerContext {
    pub fn new(assignment: Assignment, assigned_at: DateTime<Utc>) -> Self {
        Self {
            assignment,
            has_work: false,
            assigned_at,
        }
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn partition_key(&self) -> &str {
        &self.assignment.partition_key
    }

    /// 当前分配的获取时间
    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    pub fn has_work(&self) -> bool {
        self.has_work
    }

    /// 标记分区是否可能还有待处理的工作
    pub fn set_has_work(&mut self, has_work: bool) {
        self.has_work = has_work;
    }
}

/// 业务工作回调
///
/// 调度器不关心具体工作内容，只读取回调结束后的 `has_work`。
#[async_trait]
pub trait AsyncWorker: Send + Sync {
    async fn execute(&self, context: &mut WorkerContext) -> WorkinatorResult<()>;

    /// 释放回调持有的资源
    fn close(&self) -> WorkinatorResult<()> {
        Ok(())
    }
}

/// 为每个执行器槽位创建工作回调
pub trait WorkerFactory: Send + Sync {
    fn create_worker(&self, worker_id: &WorkerId) -> WorkinatorResult<Arc<dyn AsyncWorker>>;
}
