//! 基础设施模块
//!
//! 封装外部依赖（容器引擎、命令执行、端口探测等）

pub mod command;
pub mod docker;
pub mod socket_probe;

pub use command::CommandRunner;
pub use docker::{BollardEngine, ContainerEngine, ContainerSpec, ContainerSummary, EngineError};
pub use socket_probe::{PortProbe, SystemPortProbe};
