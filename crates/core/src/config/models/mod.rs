pub mod app_config;
pub mod consumer;
pub mod database;
pub mod observability;

pub use app_config::AppConfig;
pub use consumer::{ConsumerConfig, PartitionDefaultsConfig};
pub use database::DatabaseConfig;
pub use observability::ObservabilityConfig;
