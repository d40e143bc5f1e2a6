//! 健康检查 API
//!
//! 包含 /health, /status 端点

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::{SERVICE_NAME, VERSION};
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
    /// 注册表中的工作负载数量
    workloads: usize,
    reserved_ports: Vec<u16>,
    port_range: String,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(health_check))
}

/// 健康检查 - 返回状态、版本、工作负载和端口占用
///
/// GET /health, GET /status
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let workloads = state.orchestrator.list_workloads().await.len();

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.uptime_secs(),
        workloads,
        reserved_ports: state.orchestrator.reserved_ports(),
        port_range: state.orchestrator.port_range().to_string(),
    })
}
