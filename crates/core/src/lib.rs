pub mod completion;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod traits;

pub use completion::CompletionCounter;
pub use self::config::{
    AppConfig, ConsumerConfig, DatabaseConfig, ObservabilityConfig, PartitionDefaultsConfig,
};
pub use errors::*;
pub use lifecycle::{Lifecycle, ObserverId, Service, TransitionEvent};
pub use models::*;
pub use traits::*;
