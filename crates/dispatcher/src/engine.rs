use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::debug;

use workinator_core::{Assignment, LeaseStore, WorkerStatus, WorkinatorResult};

use crate::rules::{AnyIdleRule, AssignmentRule, DueAndIdleRule, KeepCurrentRule, LoadBalanceRule};

/// 分配引擎
///
/// 按顺序执行规则，第一个给出分配的规则胜出。引擎本身无状态，
/// 可以被任意多个执行器并发调用。
pub struct AssignmentEngine {
    store: Arc<dyn LeaseStore>,
    rules: Vec<Arc<dyn AssignmentRule>>,
}

impl AssignmentEngine {
    /// 使用默认规则链：到期空闲、保持当前、负载均衡、任意空闲
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        let rules: Vec<Arc<dyn AssignmentRule>> = vec![
            Arc::new(DueAndIdleRule::new(store.clone())),
            Arc::new(KeepCurrentRule::new()),
            Arc::new(LoadBalanceRule::new(store.clone())),
            Arc::new(AnyIdleRule::new(store.clone())),
        ];
        Self { store, rules }
    }

    pub fn with_rules(store: Arc<dyn LeaseStore>, rules: Vec<Arc<dyn AssignmentRule>>) -> Self {
        Self { store, rules }
    }

    pub fn add_rule(&mut self, rule: Arc<dyn AssignmentRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub async fn get_assignment(&self, status: &WorkerStatus) -> WorkinatorResult<Option<Assignment>> {
        let now = Utc::now();
        for rule in &self.rules {
            match rule.evaluate(status, now).await? {
                Some(assignment) => {
                    debug!(
                        "规则 {} 为 Worker {} 分配了分区 {}",
                        rule.name(),
                        status.worker_id,
                        assignment.partition_key
                    );
                    counter!("workinator_assignments_total", "rule" => rule.name().to_string())
                        .increment(1);
                    return Ok(Some(assignment));
                }
                None => {
                    debug!("规则 {} 未找到合适的分区，尝试下一个规则", rule.name());
                    continue;
                }
            }
        }

        debug!("Worker {} 暂时没有可分配的分区", status.worker_id);
        counter!("workinator_no_assignment_total").increment(1);
        Ok(None)
    }

    pub async fn release_assignment(&self, assignment: &Assignment) -> WorkinatorResult<()> {
        self.store
            .atomic_release(
                &assignment.partition_key,
                &assignment.worker_id.assignee(),
                Utc::now(),
            )
            .await
    }
}
