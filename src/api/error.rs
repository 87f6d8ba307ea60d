//! HTTP mapping of [`SyncError`].

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::erp::ErpError;
use crate::error::SyncError;
use crate::store::StoreError;

#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self { Self(e) }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(SyncError::validation("request body is not valid JSON", vec![rejection.body_text()]))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self(SyncError::validation("request body is not valid JSON", vec![e.to_string()]))
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            SyncError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            SyncError::NotFound(_) | SyncError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            SyncError::AlreadyRunning(_) => (StatusCode::CONFLICT, "already_running"),
            SyncError::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            SyncError::Erp(ErpError::Auth(_)) => (StatusCode::BAD_GATEWAY, "erp_auth_failed"),
            SyncError::Erp(_) => (StatusCode::INTERNAL_SERVER_ERROR, "erp_error"),
            SyncError::Store(_) | SyncError::Config(_) | SyncError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!(error = %self.0, kind, "Request failed");
        }
        let details = match &self.0 {
            SyncError::Validation { details, .. } => details.clone(),
            _ => vec![],
        };
        let message = match &self.0 {
            SyncError::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": kind, "message": message, "details": details }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: SyncError| ApiError(e).status_and_kind().0;
        assert_eq!(status(SyncError::validation("bad", vec![])), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(SyncError::NotFound("order".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(SyncError::AlreadyRunning("catalog")), StatusCode::CONFLICT);
        assert_eq!(status(ErpError::Auth("denied".into()).into()), StatusCode::BAD_GATEWAY);
        assert_eq!(status(SyncError::Internal("boom".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
