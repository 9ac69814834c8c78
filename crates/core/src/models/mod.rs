pub mod assignment;
pub mod consumer;
pub mod partition;
pub mod service_status;

pub use assignment::{Assignment, WorkerStatus, WorkerStatusRecord};
pub use consumer::{ConsumerId, ConsumerRegistration, WorkerId};
pub use partition::{PartitionConfiguration, PartitionInfo, WorkerLease};
pub use service_status::ServiceStatus;
