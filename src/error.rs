use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::users::repo::StoreError;

pub const INVALID_CREDENTIALS: &str = "Invalid username or password";
pub const DUPLICATE_USER: &str = "Username or email already exists.";
pub const USER_NOT_FOUND: &str = "User not found";

/// Failures of the credential and user operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("user not found")]
    NotFound,
    #[error("username or email already exists")]
    Duplicate,
    /// Unknown username and wrong password are deliberately the same variant.
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(StoreError),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation => ServiceError::Duplicate,
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    /// Attach the status used for unexpected failures. Each route picks its own
    /// (400 or 500); the typed variants always map to the same status.
    pub fn into_api(self, fallback: StatusCode) -> ApiError {
        ApiError {
            error: self,
            fallback,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub error: ServiceError,
    pub fallback: StatusCode,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.error {
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::Duplicate | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            _ => self.fallback,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.error {
            ServiceError::NotFound => json!({ "error": USER_NOT_FOUND }),
            ServiceError::Duplicate => json!({ "message": DUPLICATE_USER }),
            ServiceError::InvalidCredentials => json!({ "error": INVALID_CREDENTIALS }),
            ServiceError::Validation(msg) => {
                warn!(reason = %msg, "validation failed");
                json!({ "error": msg })
            }
            other => {
                error!(error = %other, %status, "request failed");
                let msg = if status.is_server_error() {
                    "Internal server error"
                } else {
                    "Request could not be processed"
                };
                json!({ "error": msg })
            }
        };
        (status, Json(body)).into_response()
    }
}
