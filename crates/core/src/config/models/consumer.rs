use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 消费者（执行器池）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// 每个消费者的执行器数量
    pub max_executor_count: usize,
    /// 执行器持有一个分区的最短时间，期间不会重新评估分配
    pub min_work_time_seconds: u64,
    /// 没有分配时的等待时间
    pub idle_backoff_ms: u64,
    /// 等待时间的随机抖动上限
    pub idle_jitter_ms: u64,
    /// 状态上报间隔
    pub status_interval_seconds: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_executor_count: 1,
            min_work_time_seconds: 30,
            idle_backoff_ms: 1000,
            idle_jitter_ms: 250,
            status_interval_seconds: 25,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_executor_count == 0 {
            return Err(anyhow::anyhow!("执行器数量必须大于0"));
        }

        if self.idle_backoff_ms == 0 {
            return Err(anyhow::anyhow!("空闲等待时间必须大于0"));
        }

        if self.status_interval_seconds == 0 {
            return Err(anyhow::anyhow!("状态上报间隔必须大于0"));
        }

        Ok(())
    }

    pub fn min_work_time(&self) -> Duration {
        Duration::from_secs(self.min_work_time_seconds)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_seconds)
    }
}

/// 新建分区的默认配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionDefaultsConfig {
    pub max_worker_count: i32,
    pub max_idle_time_seconds: i64,
}

impl Default for PartitionDefaultsConfig {
    fn default() -> Self {
        Self {
            max_worker_count: crate::models::partition::DEFAULT_MAX_WORKER_COUNT,
            max_idle_time_seconds: crate::models::partition::DEFAULT_MAX_IDLE_TIME_SECONDS,
        }
    }
}

impl PartitionDefaultsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_worker_count < 1 {
            return Err(anyhow::anyhow!("分区最大Worker数必须大于0"));
        }

        if self.max_idle_time_seconds < 0 {
            return Err(anyhow::anyhow!("分区最大空闲时间不能为负数"));
        }

        Ok(())
    }
}
