//! 分区分配引擎与协调器
//!
//! 规则链负责为每个执行器槽位计算下一个分区，协调器在其上提供消费者注册、
//! 分区管理和状态上报。所有共享状态都在 `LeaseStore` 中。

pub mod coordinator;
pub mod engine;
pub mod rules;

#[cfg(test)]
pub mod test_utils;

pub use coordinator::WorkinatorCoordinator;
pub use engine::AssignmentEngine;
pub use rules::*;
