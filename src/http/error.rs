//! HTTP error taxonomy (spec §7) mapped onto status codes and a uniform
//! JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::agent::EngineError;
use crate::llm::LlmError;
use crate::skills::RegistryError;
use crate::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Cancelled,
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Cancelled => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Cancelled => "cancelled",
            Self::BadGateway(_) => "llm_stream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::Conflict(m) | Self::BadGateway(m) | Self::Internal(m) => {
                m.clone()
            }
            Self::Cancelled => "request cancelled".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({ "error": self.message(), "error_code": self.error_code() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => Self::NotFound(format!("session {id} not found")),
            StoreError::MessageNotFound(id) => Self::NotFound(format!("message {id} not found")),
            other => {
                tracing::error!(error = %other, "store error");
                Self::Internal("persistence error".to_string())
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(name) => Self::NotFound(format!("skill `{name}` not found")),
            other => {
                tracing::error!(error = %other, "registry rebuild failed, prior snapshot retained");
                Self::Internal("skill registry rebuild failed".to_string())
            }
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        tracing::error!(error = %err, "llm provider error");
        Self::BadGateway("llm provider error".to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(e) => e.into(),
            EngineError::Llm(e) => e.into(),
            EngineError::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_maps_to_404() {
        let err = ApiError::from(StoreError::SessionNotFound(uuid::Uuid::nil()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn cancelled_maps_to_400() {
        assert_eq!(ApiError::Cancelled.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Cancelled.error_code(), "cancelled");
    }

    #[test]
    fn llm_error_maps_to_502() {
        let err = ApiError::from(LlmError::Provider("connection reset".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_code(), "llm_stream_error");
    }
}
