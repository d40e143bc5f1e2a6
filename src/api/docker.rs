//! 工作负载 API
//!
//! 包含 /docker/* 端点

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::domain::{ActivateOutcome, DeployOutcome, HibernateOutcome, OperationStatus, Workload};
use crate::error::ApiResult;
use crate::state::AppState;

/// 部署请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// 缺失时由编排层返回校验错误
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub repository: String,
}

/// hibernate / activate 请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIdRequest {
    #[serde(default)]
    pub image_id: String,
}

#[derive(Debug, Serialize)]
pub struct HibernateResponse {
    pub status: OperationStatus,
    pub code: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResponse {
    pub status: OperationStatus,
    pub code: u16,
    pub tunnel_url: String,
}

#[derive(Debug, Serialize)]
pub struct WorkloadsResponse {
    pub workloads: Vec<Workload>,
    pub total: usize,
}

/// 创建工作负载路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/docker/deploy", post(deploy))
        .route("/docker/hibernate", post(hibernate))
        .route("/docker/activate", post(activate))
        .route("/docker/workloads", get(list_workloads))
}

/// 部署镜像并返回隧道 URL
///
/// POST /docker/deploy
async fn deploy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<Json<DeployOutcome>> {
    info!(image_name = %req.image_name, repository = %req.repository, "Deploy requested");
    let outcome = state
        .orchestrator
        .deploy(&req.image_name, &req.repository)
        .await?;
    Ok(Json(outcome))
}

/// 停止镜像对应的容器
///
/// POST /docker/hibernate
/// HTTP 状态码与响应体中的 code 一致
async fn hibernate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImageIdRequest>,
) -> impl IntoResponse {
    let outcome: HibernateOutcome = state.orchestrator.hibernate(&req.image_id).await;
    let code = outcome.code();
    (
        status_for(code),
        Json(HibernateResponse {
            status: outcome.status(),
            code,
        }),
    )
}

/// 从镜像 ID 重新启动容器
///
/// POST /docker/activate
async fn activate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImageIdRequest>,
) -> impl IntoResponse {
    let outcome: ActivateOutcome = state.orchestrator.activate(&req.image_id).await;
    let code = outcome.code();
    (
        status_for(code),
        Json(ActivateResponse {
            status: outcome.status(),
            code,
            tunnel_url: outcome.tunnel_url().to_string(),
        }),
    )
}

/// 列出工作负载
///
/// GET /docker/workloads
async fn list_workloads(State(state): State<Arc<AppState>>) -> Json<WorkloadsResponse> {
    let workloads = state.orchestrator.list_workloads().await;
    let total = workloads.len();
    Json(WorkloadsResponse { workloads, total })
}

fn status_for(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
