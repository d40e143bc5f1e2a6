//! 统一错误处理
//!
//! 提供 `ApiError` 枚举实现 `IntoResponse`，替代重复的 `(StatusCode, Json<ErrorResponse>)` 模式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::{MinerError, WorkloadError};

/// API 错误响应结构
///
/// `error` 是机器可读的类别（如 `port_exhausted`），`message` 是人类可读描述
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 400 - 请求无效
    BadRequest(String),
    /// 工作负载编排失败，状态码由错误类别决定
    Workload(WorkloadError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Workload(err) => match err {
                WorkloadError::Validation(_) => StatusCode::BAD_REQUEST,
                WorkloadError::PortExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            ApiError::BadRequest(msg) => ErrorResponse::new("bad_request", msg),
            ApiError::Workload(err) => ErrorResponse::new(err.kind(), err.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(m) => write!(f, "Bad request: {}", m),
            ApiError::Workload(e) => write!(f, "Workload error: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<WorkloadError> for ApiError {
    fn from(err: WorkloadError) -> Self {
        Self::Workload(err)
    }
}

impl From<MinerError> for ApiError {
    fn from(err: MinerError) -> Self {
        match err {
            MinerError::Validation(msg) => Self::BadRequest(msg),
        }
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
