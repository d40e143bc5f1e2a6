//! 服务层模块
//!
//! 包含核心业务逻辑

pub mod container;
pub mod error;
pub mod image;
pub mod miner;
pub mod port_allocator;
pub mod tunnel;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{WorkloadError, WorkloadResult};
pub use miner::{Miner, MinerError};
pub use workload::{LifecycleOrchestrator, OrchestratorSettings};
