use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error as ThisError;

use crate::model::ModelError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Bad form data or a file of the wrong type
    #[error("{message}")]
    Validation { message: String },

    #[error("upload exceeds {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: usize },

    /// The upload claimed to be an image but could not be decoded
    #[error("could not decode image: {message}")]
    Decode { message: String },

    /// Guest session used up its free analyses
    #[error("guest quota of {limit} analyses exceeded")]
    QuotaExceeded { limit: i64 },

    /// Bad credentials, invalid/expired token or code
    #[error("{message}")]
    Auth { message: String },

    #[error("email address not verified")]
    EmailNotVerified,

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Failed to {operation}")]
    Internal { operation: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
        }
    }

    pub fn internal(operation: impl Into<String>) -> Self {
        Error::Internal {
            operation: operation.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            Error::Auth { .. } => StatusCode::UNAUTHORIZED,
            Error::EmailNotVerified => StatusCode::FORBIDDEN,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for the front end.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation_error",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::Decode { .. } => "decode_error",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::Auth { .. } => "auth_error",
            Error::EmailNotVerified => "email_not_verified",
            Error::Conflict { .. } => "conflict",
            Error::NotFound { .. } => "not_found",
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => "internal_error",
        }
    }

    /// Message safe to show to the user; internal failures never leak details.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { message } | Error::Auth { message } => message.clone(),
            Error::Conflict { message } => message.clone(),
            Error::PayloadTooLarge { limit_bytes } => format!(
                "File is too large. The maximum size is {} MB.",
                limit_bytes / (1024 * 1024)
            ),
            Error::Decode { .. } => "The uploaded file is not a readable image.".to_string(),
            Error::QuotaExceeded { limit } => format!(
                "Guests can analyse {limit} images. Sign up to keep analysing and save your history."
            ),
            Error::EmailNotVerified => {
                "Please verify your email address before signing in.".to_string()
            }
            Error::NotFound { resource, .. } => format!("{resource} not found"),
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl From<ModelError> for Error {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Decode(message) => Error::Decode { message },
            other => Error::Other(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => {
                tracing::error!("internal error: {:#}", self);
            }
            Error::Auth { .. } | Error::EmailNotVerified | Error::QuotaExceeded { .. } => {
                tracing::info!("rejected: {}", self);
            }
            Error::Conflict { .. } => {
                tracing::warn!("conflict: {}", self);
            }
            _ => {
                tracing::debug!("client error: {}", self);
            }
        }

        let status = self.status_code();
        let mut body = json!({
            "code": self.code(),
            "message": self.user_message(),
        });
        if let Error::QuotaExceeded { limit } = &self {
            body["limit"] = json!(limit);
            body["signup"] = json!("/api/v1/auth/signup");
        }
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, Error>;
