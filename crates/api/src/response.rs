//! 统一应答封装，code == 0 表示成功

use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            code: 0,
            message: "成功".to_string(),
            data: Some(data),
        })
    }
}

impl ApiResponse<()> {
    pub fn success_empty() -> Json<Self> {
        Json(Self {
            code: 0,
            message: "成功".to_string(),
            data: None,
        })
    }
}
