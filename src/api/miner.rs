//! 哈希搜索 API

use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;

use crate::domain::{MineRequest, MineResult};
use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/miner", post(mine))
}

/// POST /miner
async fn mine(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MineRequest>,
) -> ApiResult<Json<MineResult>> {
    let result = state.miner.search(&req.query, req.difficulty).await?;
    Ok(Json(result))
}
