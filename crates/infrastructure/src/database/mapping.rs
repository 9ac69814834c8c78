//! 数据库行映射辅助函数
//!
//! SQLite 中时间统一存为毫秒时间戳，租约列表存为 JSON 文本。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use workinator_core::{PartitionInfo, WorkerLease, WorkinatorError, WorkinatorResult};

/// workers 列中单个租约的存储格式
#[derive(Debug, Serialize, Deserialize)]
struct StoredLease {
    assignee: String,
    insert_date: i64,
    rule: String,
}

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn to_millis(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    pub fn from_millis(millis: i64) -> WorkinatorResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| WorkinatorError::Serialization(format!("无效的时间戳: {millis}")))
    }

    pub fn optional_from_millis(millis: Option<i64>) -> WorkinatorResult<Option<DateTime<Utc>>> {
        millis.map(Self::from_millis).transpose()
    }

    pub fn parse_workers(row: &SqliteRow, field_name: &str) -> WorkinatorResult<Vec<WorkerLease>> {
        let json_str: String = row.try_get(field_name)?;
        let stored: Vec<StoredLease> = serde_json::from_str(&json_str)
            .map_err(|e| WorkinatorError::Serialization(format!("解析租约列表失败: {e}")))?;

        stored
            .into_iter()
            .map(|lease| {
                Ok(WorkerLease {
                    assignee: lease.assignee,
                    insert_date: Self::from_millis(lease.insert_date)?,
                    rule: lease.rule,
                })
            })
            .collect()
    }

    pub fn row_to_partition(row: &SqliteRow) -> WorkinatorResult<PartitionInfo> {
        Ok(PartitionInfo {
            partition_key: row.try_get("partition_key")?,
            max_worker_count: row.try_get("max_worker_count")?,
            max_idle_time_seconds: row.try_get("max_idle_time_seconds")?,
            worker_count: row.try_get("worker_count")?,
            assignment_count: row.try_get("assignment_count")?,
            due_date: Self::optional_from_millis(row.try_get("due_date")?)?,
            last_checked_date: Self::optional_from_millis(row.try_get("last_checked_date")?)?,
            has_work: row.try_get("has_work")?,
            workers: Self::parse_workers(row, "workers")?,
            created_at: Self::from_millis(row.try_get("created_at")?)?,
        })
    }
}
