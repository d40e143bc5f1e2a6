//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod miner;
pub mod port;
pub mod workload;

// Re-exports for convenience
pub use miner::{MineRequest, MineResult};
pub use port::PortRange;
pub use workload::{
    normalize_image_id, ActivateOutcome, DeployOutcome, HibernateOutcome, ImageRef,
    OperationStatus, Workload, WorkloadState,
};
