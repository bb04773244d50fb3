//! Error taxonomy and the JSON envelope returned for every non-2xx response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;
use ulid::Ulid;
use utoipa::ToSchema;

/// Wire shape of an error: `{code, message, traceId, details}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "traceId")]
    pub trace_id: String,
    #[schema(value_type = Object)]
    pub details: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or policy-violating input
    #[error("{0}")]
    Validation(String),

    /// Bad credentials or an invalid/expired session
    #[error("{0}")]
    Unauthorized(String),

    /// Role mismatch
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate unique field
    #[error("{0}")]
    Conflict(String),

    /// Unexpected failure; full detail is logged with the trace id, never returned
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Every error gets a fresh trace id; ids are never reused.
        let trace_id = Ulid::new().to_string();
        let status = self.status();

        let message = match &self {
            Self::Internal(err) => {
                error!(trace_id = %trace_id, "Unhandled error: {err:?}");
                "Unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            code: self.code().to_string(),
            message,
            trace_id,
            details: json!({ "status": status.as_u16() }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn status_and_code_mapping() {
        let cases = [
            (ApiError::validation("x"), StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            (
                ApiError::unauthorized("x"),
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
            ),
            (ApiError::forbidden("x"), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (ApiError::conflict("x"), StatusCode::CONFLICT, "CONFLICT"),
            (
                ApiError::Internal(anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn envelope_serializes_with_camel_case_trace_id() {
        let body = ErrorBody {
            code: "BAD_REQUEST".to_string(),
            message: "nope".to_string(),
            trace_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            details: json!({ "status": 400 }),
        };
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(value["traceId"], "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(value["details"]["status"], 400);
        assert!(value.get("trace_id").is_none());
    }

    #[tokio::test]
    async fn internal_error_hides_detail() {
        let response = ApiError::Internal(anyhow!("secret database detail")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(!text.contains("secret database detail"));
        assert!(text.contains("Unexpected error occurred"));
    }

    #[tokio::test]
    async fn trace_ids_are_unique_per_error() {
        let first = ApiError::validation("a").into_response();
        let second = ApiError::validation("a").into_response();
        let first = axum::body::to_bytes(first.into_body(), usize::MAX)
            .await
            .expect("body");
        let second = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .expect("body");
        let first: serde_json::Value = serde_json::from_slice(&first).expect("json");
        let second: serde_json::Value = serde_json::from_slice(&second).expect("json");
        assert_ne!(first["traceId"], second["traceId"]);
    }
}
