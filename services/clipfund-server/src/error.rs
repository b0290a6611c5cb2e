//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use clipfund_db::DbError;
use clipfund_engine::EngineError;
use clipfund_ingest::WebhookError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Unauthorized => -1001,
            Self::InvalidSignature => -1002,
            Self::Forbidden(_) => -1003,
            Self::BadRequest(_) => -1100,
            Self::NotFound(_) => -2001,
            Self::Conflict(_) => -2002,
            Self::ServiceUnavailable => -5001,
            Self::Internal(_) => -5000,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body: `{code, msg}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: i32,
    pub msg: String,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.error_code(),
            msg: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        if err.is_conflict() {
            return Self::Conflict(err.to_string());
        }
        match err {
            EngineError::CampaignNotFound(id) => Self::NotFound(format!("campaign {}", id)),
            EngineError::Store(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => Self::NotFound(what),
            DbError::AlreadySettled(id) => Self::Conflict(format!("campaign {} is already settled", id)),
            DbError::Connection(_) => Self::ServiceUnavailable,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => Self::InvalidSignature,
            WebhookError::ForbiddenSource(ip) => Self::Forbidden(format!("source {} not allowed", ip)),
            WebhookError::Malformed(reason) => Self::BadRequest(reason),
            WebhookError::InvalidAllowlist(reason) => Self::Internal(reason),
        }
    }
}
