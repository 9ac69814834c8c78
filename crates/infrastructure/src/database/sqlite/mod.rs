pub mod sqlite_lease_store;

pub use sqlite_lease_store::SqliteLeaseStore;
