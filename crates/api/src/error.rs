use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use spaceshare_auth::{AuthError, DenyReason};
use spaceshare_core::protocol::ErrorResponse;
use spaceshare_core::validation::ValidationError;
use spaceshare_storage::StorageError;
use tracing::error;

use crate::blobs::BlobStoreError;

/// Terminal failure of an HTTP action, rendered as `{"error", "code"}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("upload rate limit exceeded")]
    RateLimited,
    #[error("{0}")]
    Validation(String),
    #[error("internal error")]
    Internal,
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Validation(_) => "validation",
            Self::Internal => "internal",
        }
    }

    pub(crate) fn invalid(field: &'static str) -> Self {
        Self::Validation(ValidationError::InvalidField(field).to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_owned(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::SpaceNotFound => Self::NotFound("space not found"),
            StorageError::MemberNotFound => Self::NotFound("member not found"),
            StorageError::FileNotFound => Self::NotFound("file not found"),
            StorageError::UserNotFound => Self::NotFound("user not found"),
            StorageError::InviteNotFound => Self::NotFound("invalid invite link"),
            StorageError::MembershipExists => Self::Conflict("user already in space"),
            StorageError::UserExists => Self::Conflict("user already exists"),
            StorageError::LastAdmin => Self::Conflict("last admin"),
            other => {
                error!(error = %other, "storage failure");
                Self::Internal
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingToken => Self::Unauthorized("authorization required"),
            AuthError::InvalidToken => Self::Unauthorized("invalid token"),
            AuthError::ExpiredToken => Self::Unauthorized("token has expired"),
        }
    }
}

impl From<DenyReason> for ApiError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::MissingCapability(_) => Self::Forbidden("insufficient role"),
            DenyReason::NotUploader => Self::Forbidden("only the uploader can access this file"),
        }
    }
}

impl From<BlobStoreError> for ApiError {
    fn from(error: BlobStoreError) -> Self {
        match error {
            BlobStoreError::NotFound => Self::NotFound("file content not found"),
            BlobStoreError::Backend(message) => {
                error!(error = %message, "blob store failure");
                Self::Internal
            }
        }
    }
}
