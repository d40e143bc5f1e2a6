//! 工作负载错误类型

use thiserror::Error;

use crate::infra::EngineError;

/// 工作负载编排错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkloadError {
    /// 请求字段缺失或格式错误，不会触发任何外部调用
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("failed to provision image '{reference}': {reason}")]
    ImageProvision { reference: String, reason: String },

    #[error("no free port in range {low}-{high}")]
    PortExhausted { low: u16, high: u16 },

    #[error("failed to start container from '{image}': {reason}")]
    ContainerStart { image: String, reason: String },

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("container engine communication failed: {0}")]
    RuntimeCommunication(String),

    #[error("tunnel on port {port} produced no URL within {timeout_secs}s")]
    TunnelTimeout { port: u16, timeout_secs: u64 },

    #[error("tunnel failed: {0}")]
    Tunnel(String),
}

impl WorkloadError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// 错误类别标识（用于日志和 API 响应）
    pub fn kind(&self) -> &'static str {
        match self {
            WorkloadError::Validation(_) => "validation_error",
            WorkloadError::ImageProvision { .. } => "image_provision_error",
            WorkloadError::PortExhausted { .. } => "port_exhausted",
            WorkloadError::ContainerStart { .. } => "container_start_error",
            WorkloadError::ContainerNotFound(_) => "container_not_found",
            WorkloadError::RuntimeCommunication(_) => "runtime_communication_error",
            WorkloadError::TunnelTimeout { .. } => "tunnel_timeout",
            WorkloadError::Tunnel(_) => "tunnel_error",
        }
    }
}

impl From<EngineError> for WorkloadError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(what) => WorkloadError::ContainerNotFound(what),
            other => WorkloadError::RuntimeCommunication(other.to_string()),
        }
    }
}

/// 便捷类型别名
pub type WorkloadResult<T> = Result<T, WorkloadError>;
