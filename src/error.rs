//! Error handler for ldappass.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidationErrors;

use crate::passwd::ChangeError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// User-facing text for any directory-side failure. Directory topology and
/// raw protocol errors never reach responses.
const CHANGE_FAILED: &str = "password change failed";

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Change(#[from] ChangeError),

    #[error("internal server error, {details}")]
    Internal { details: String },
}

/// Uniform response body for password operations.
#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    pub success: bool,
    pub message: String,
}

impl Message {
    /// Build a success body.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Build a failure body.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, validation_message(errors))
            },

            ServerError::Axum(rejection) => {
                (StatusCode::BAD_REQUEST, rejection.body_text())
            },

            ServerError::Change(
                err @ (ChangeError::UserNotFound | ChangeError::InvalidCredentials),
            ) => (StatusCode::BAD_REQUEST, err.to_string()),

            ServerError::Change(err) => {
                tracing::error!(error = ?err, "password change failed");

                (StatusCode::INTERNAL_SERVER_ERROR, CHANGE_FAILED.to_owned())
            },

            ServerError::Internal { details } => {
                tracing::error!(%details, "server returned 500 status");

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            },
        };

        (status, Json(Message::failure(message))).into_response()
    }
}

fn validation_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(_, issues)| issues.iter().map(|issue| issue.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}
