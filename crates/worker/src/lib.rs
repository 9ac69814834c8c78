pub mod consumer;
pub mod executor;
pub mod maintenance;

pub use consumer::{ConsumerInfo, WorkinatorConsumer, WorkinatorConsumerBuilder};
pub use executor::{Executor, ExecutorInfo, ExecutorSettings};
pub use maintenance::{ScheduledAction, ScheduledTask};
