use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use cronplane_domain::{
    ExecutorHeartbeat, ExecutorNode, ExecutorRegistration, ResultCallback, StartCallback,
};

use crate::error::ApiResult;
use crate::response::ApiResponse;
use crate::routes::AppState;

pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    ApiResponse::success("ok")
}

pub async fn register_executor(
    State(state): State<AppState>,
    Json(registration): Json<ExecutorRegistration>,
) -> ApiResult<Json<ApiResponse<ExecutorNode>>> {
    let node = state.registry.register(registration).await?;
    Ok(ApiResponse::success(node))
}

pub async fn heartbeat_executor(
    State(state): State<AppState>,
    Json(heartbeat): Json<ExecutorHeartbeat>,
) -> ApiResult<Json<ApiResponse<()>>> {
    debug!("收到执行器 {} 心跳", heartbeat.executor_id);
    state.registry.heartbeat(heartbeat).await?;
    Ok(ApiResponse::success_empty())
}

#[derive(Debug, Deserialize)]
pub struct UnregisterRequest {
    pub executor_id: String,
}

pub async fn unregister_executor(
    State(state): State<AppState>,
    Json(request): Json<UnregisterRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.registry.unregister(&request.executor_id).await?;
    Ok(ApiResponse::success_empty())
}

/// 执行器回报任务开始
pub async fn handle_start(
    State(state): State<AppState>,
    Json(callback): Json<StartCallback>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.dispatch.handle_start_callback(callback).await?;
    Ok(ApiResponse::success_empty())
}

/// 执行器回报执行结果
pub async fn handle_result(
    State(state): State<AppState>,
    Json(callback): Json<ResultCallback>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.dispatch.handle_result_callback(callback).await?;
    Ok(ApiResponse::success_empty())
}
