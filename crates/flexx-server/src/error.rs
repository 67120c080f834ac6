use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flexx::errors::FieldError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Errors returned to HTTP clients, rendered as `{"detail": ...}` bodies
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),

    #[error("{message}")]
    BadRequest { status: StatusCode, message: String },

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": errors })),
            )
                .into_response(),
            ApiError::BadRequest { status, message } => {
                (status, Json(json!({ "detail": message }))).into_response()
            }
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": message })),
            )
                .into_response(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // Well formed JSON that doesn't match the schema
            JsonRejection::JsonDataError(err) => ApiError::Validation(vec![FieldError::new(
                vec![json!("body")],
                err.body_text(),
                "value_error",
            )]),
            other => ApiError::BadRequest {
                status: other.status(),
                message: other.body_text(),
            },
        }
    }
}
