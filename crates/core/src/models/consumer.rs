use std::fmt;

use serde::{Deserialize, Serialize};

/// 消费者标识，由调用方提供，在活跃消费者中唯一
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 消费者注册信息
///
/// `receipt` 由协调器签发，消费者在整个生命周期内持有且不修改。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerRegistration {
    pub consumer_id: ConsumerId,
    pub receipt: String,
}

impl ConsumerRegistration {
    pub fn new(consumer_id: ConsumerId, receipt: impl Into<String>) -> Self {
        Self {
            consumer_id,
            receipt: receipt.into(),
        }
    }

    /// 空的receipt视为无效注册
    pub fn is_valid(&self) -> bool {
        !self.receipt.trim().is_empty()
    }
}

/// 一个消费者内的执行器槽位
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    pub registration: ConsumerRegistration,
    pub slot: usize,
}

impl WorkerId {
    pub fn new(registration: ConsumerRegistration, slot: usize) -> Self {
        Self { registration, slot }
    }

    /// 租约持有者标识: `{consumer_id}:{receipt}:{slot}`
    pub fn assignee(&self) -> String {
        format!(
            "{}:{}:{}",
            self.registration.consumer_id, self.registration.receipt, self.slot
        )
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.registration.consumer_id, self.slot)
    }
}
