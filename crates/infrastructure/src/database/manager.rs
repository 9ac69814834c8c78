use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;
use workinator_core::{DatabaseConfig, LeaseStore, WorkinatorError, WorkinatorResult};

use super::sqlite::SqliteLeaseStore;

/// 数据库管理器
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> WorkinatorResult<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        // 内存数据库随最后一个连接关闭而消失，连接不能被回收
        if config.is_in_memory() {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(connect_options).await?;
        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> WorkinatorResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| WorkinatorError::FatalSetup(format!("数据库迁移失败: {e}")))?;
        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> WorkinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn lease_store(&self) -> Arc<dyn LeaseStore> {
        Arc::new(SqliteLeaseStore::new(self.pool.clone()))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
