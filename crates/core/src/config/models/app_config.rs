use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    consumer::{ConsumerConfig, PartitionDefaultsConfig},
    database::DatabaseConfig,
    observability::ObservabilityConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub consumer: ConsumerConfig,
    pub partition: PartitionDefaultsConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: WORKINATOR_, nesting: `__`)
    ///
    /// A missing explicit `config_path` is an error; without a path the default
    /// locations are tried and skipped when absent.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/workinator.toml", "workinator.toml"];
            if let Some(path) = default_paths.iter().find(|path| Path::new(path).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("WORKINATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.consumer.validate().context("消费者配置验证失败")?;
        self.partition.validate().context("分区配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consumer.max_executor_count, 1);
        assert_eq!(config.consumer.status_interval_seconds, 25);
        assert_eq!(config.consumer.min_work_time_seconds, 30);
    }

    #[test]
    fn test_load_from_file_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[database]
url = "sqlite://workinator.db"
max_connections = 4

[consumer]
max_executor_count = 8
min_work_time_seconds = 5
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.database.url, "sqlite://workinator.db");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.consumer.max_executor_count, 8);
        assert_eq!(config.consumer.min_work_time_seconds, 5);
        assert_eq!(config.consumer.idle_backoff_ms, 1000);
        assert_eq!(config.partition.max_worker_count, 1);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = AppConfig::load(Some("/definitely/not/here/workinator.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = AppConfig::default();
        config.consumer.max_executor_count = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/db".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.observability.log_format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.partition.max_worker_count = 0;
        assert!(config.validate().is_err());
    }
}
