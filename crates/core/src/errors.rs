use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum WorkinatorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("消费者已存在: {consumer_id}")]
    ConsumerExists { consumer_id: String },

    #[error("分区已存在: {partition_key}")]
    PartitionExists { partition_key: String },

    #[error("分区未找到: {partition_key}")]
    PartitionNotFound { partition_key: String },

    #[error("无效的分区配置: {0}")]
    InvalidPartition(String),

    #[error("启动失败: {0}")]
    FatalSetup(String),

    #[error("服务 {service} 无法从 {from} 切换到 {to}")]
    InvalidTransition {
        service: String,
        from: String,
        to: String,
    },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("工作执行错误: {0}")]
    WorkExecution(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl WorkinatorError {
    /// 是否为调用方可以修正的冲突错误
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            WorkinatorError::ConsumerExists { .. } | WorkinatorError::PartitionExists { .. }
        )
    }
}

/// 统一的Result类型
pub type WorkinatorResult<T> = std::result::Result<T, WorkinatorError>;
