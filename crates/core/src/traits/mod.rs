pub mod coordinator;
pub mod lease_store;
pub mod worker;

pub use coordinator::*;
pub use lease_store::*;
pub use worker::*;
