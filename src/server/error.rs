// API 错误响应
//
// 错误统一使用 {code, message, data} 结构，data.kind 为机器可读的错误类别，
// 前端据此显示各自的提示文案

use crate::server::handlers::ApiResponse;
use crate::uploader::{UploadError, UploadErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub kind: Option<UploadErrorKind>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

fn status_for(kind: UploadErrorKind) -> StatusCode {
    match kind {
        UploadErrorKind::InputValidation => StatusCode::BAD_REQUEST,
        UploadErrorKind::AuthRequired => StatusCode::UNAUTHORIZED,
        UploadErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        UploadErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        UploadErrorKind::SessionExpired | UploadErrorKind::UploadFailed => StatusCode::BAD_GATEWAY,
        UploadErrorKind::StorageError | UploadErrorKind::CorruptData => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        UploadErrorKind::Cancelled => StatusCode::CONFLICT,
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let kind = err.kind();
        Self {
            status: status_for(kind),
            message: err.to_string(),
            kind: Some(kind),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let data = self.kind.map(|kind| json!({ "kind": kind }));
        let body = ApiResponse {
            code: self.status.as_u16() as i32,
            message: self.message,
            data,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_mapping() {
        let err = ApiError::from(UploadError::AuthRequired("no credential".into()));
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.kind, Some(UploadErrorKind::AuthRequired));

        let err = ApiError::from(UploadError::input("bad title"));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("bad title"));
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::from(UploadError::CorruptData("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::not_found("missing").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
