//! HTTP错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use opd_core::OpdError;
use serde_json::json;
use tracing::error;

/// 把领域错误转换为带稳定错误码的HTTP响应
#[derive(Debug)]
pub struct ApiError(pub OpdError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            OpdError::Conflict(_) | OpdError::InvalidState { .. } => StatusCode::CONFLICT,
            OpdError::NotFound(_) | OpdError::QueueEmpty(_) => StatusCode::NOT_FOUND,
            OpdError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OpdError> for ApiError {
    fn from(err: OpdError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": true,
            "code": self.0.code(),
            "message": self.0.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
