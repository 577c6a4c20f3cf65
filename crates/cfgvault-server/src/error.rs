//! HTTP error responses
//!
//! Every failure leaves as `{"error": {"code", "message", "details"?}}`.
//! Server-side failures are logged and answered with a fixed message.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cfgvault_cache::CacheError;
use cfgvault_core::DistributionError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// Error returned by request handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Domain failure
    #[error(transparent)]
    Distribution(#[from] DistributionError),

    /// Failure outside the domain taxonomy (response encoding and the like)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// 400 with `message`
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Distribution(DistributionError::InvalidRequest(message.into()))
    }

    /// 404 with `message`
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Distribution(DistributionError::NotFound(message.into()))
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Distribution(e) => {
                let status = match e {
                    DistributionError::NotFound(_) => StatusCode::NOT_FOUND,
                    DistributionError::Materialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    DistributionError::CacheIntegrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    DistributionError::TokenInvalid => StatusCode::FORBIDDEN,
                    DistributionError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                    DistributionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                };
                (status, e.code())
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        Self::Distribution(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            match status {
                StatusCode::SERVICE_UNAVAILABLE => {
                    tracing::warn!(error = %self, "storage unavailable");
                    "storage is temporarily unavailable".to_owned()
                }
                _ => {
                    tracing::error!(error = %self, "internal server error");
                    "an internal error occurred".to_owned()
                }
            }
        } else {
            self.to_string()
        };

        let details = match &self {
            Self::Distribution(DistributionError::Materialization(e)) => {
                serde_json::to_value(e.violations()).ok()
            }
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
