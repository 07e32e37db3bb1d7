//! HTTP error type

use crate::keystore::KeyStoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use solo_engine::ManagerError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API key not provided")]
    AuthMissing,

    #[error("invalid API key")]
    AuthInvalid,

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::AuthMissing => (StatusCode::UNAUTHORIZED, "AUTH_MISSING"),
            ApiError::AuthInvalid => (StatusCode::UNAUTHORIZED, "AUTH_INVALID"),
            ApiError::KeyStore(err) => match err {
                KeyStoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "STORE_NOT_FOUND"),
                KeyStoreError::Corrupt { .. } => (StatusCode::FORBIDDEN, "STORE_CORRUPT"),
                KeyStoreError::EmptyUsername => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_IO"),
            },
            ApiError::Manager(err) => match err {
                ManagerError::ModelLoad { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "MODEL_LOAD"),
                ManagerError::NoModelLoaded => (StatusCode::BAD_REQUEST, "NO_MODEL_LOADED"),
                ManagerError::InvalidParameters(_) => (StatusCode::BAD_REQUEST, "INVALID_PARAMETERS"),
                ManagerError::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "GENERATION_FAILED"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("worker task failed: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(code, error = %self, "request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use solo_engine::RuntimeError;
    use std::path::PathBuf;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::AuthMissing, StatusCode::UNAUTHORIZED),
            (ApiError::AuthInvalid, StatusCode::UNAUTHORIZED),
            (
                KeyStoreError::NotFound { path: PathBuf::from("k.json") }.into(),
                StatusCode::NOT_FOUND,
            ),
            (
                KeyStoreError::Corrupt {
                    path: PathBuf::from("k.json"),
                    reason: "eof".into(),
                }
                .into(),
                StatusCode::FORBIDDEN,
            ),
            (
                KeyStoreError::Io(std::io::Error::other("disk full")).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ManagerError::NoModelLoaded.into(), StatusCode::BAD_REQUEST),
            (
                ManagerError::InvalidParameters("top_p".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                ManagerError::Generation(RuntimeError::Inference("boom".into())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_and_code().0, expected, "{err}");
        }
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let err: ApiError = ManagerError::ModelLoad {
            model: "gpt2".into(),
            source: RuntimeError::Repository("404 Not Found".into()),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "MODEL_LOAD");
        assert!(body["error"].as_str().unwrap().contains("404 Not Found"));
    }
}
