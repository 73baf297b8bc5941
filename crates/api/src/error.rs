//! 错误到 HTTP 应答的映射

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use cronplane_errors::SchedulerError;

pub type ApiResult<T> = Result<T, ApiError>;

pub struct ApiError(pub SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: i32,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SchedulerError::GroupNotFound { .. }
            | SchedulerError::TaskNotFound { .. }
            | SchedulerError::InstanceNotFound { .. }
            | SchedulerError::ExecutorNotFound { .. } => StatusCode::NOT_FOUND,
            SchedulerError::InvalidCron { .. }
            | SchedulerError::InvalidStateTransition { .. }
            | SchedulerError::CycleDetected { .. } => StatusCode::BAD_REQUEST,
            SchedulerError::NoAvailableExecutor
            | SchedulerError::PoolFull
            | SchedulerError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("请求处理失败: {}", self.0);
        }

        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
