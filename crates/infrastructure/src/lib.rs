pub mod database;
pub mod memory_store;

pub use database::*;
pub use memory_store::InMemoryLeaseStore;
