use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::replicate::ReplicateError;

/// Gateway-level error taxonomy. Every variant renders as `{error, message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("request body too large: {0}")]
    PayloadTooLarge(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("upstream provider error: {0}")]
    Upstream(String),
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Unhandled(String),
}

pub const RATE_LIMIT_ERROR: &str = "Too many requests";
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded, please try again later.";

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Configuration(_) | ApiError::Upstream(_) | ApiError::Unhandled(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiError::Configuration(_) => "Configuration error",
            ApiError::Validation(_) => "Validation error",
            ApiError::PayloadTooLarge(_) => "Payload too large",
            ApiError::RateLimited => RATE_LIMIT_ERROR,
            ApiError::Upstream(_) => "Generation failed",
            ApiError::AuthenticationRequired => "Authentication required",
            ApiError::NotFound(_) => "Not Found",
            ApiError::Unhandled(_) => "Internal server error",
        }
    }

    /// Client-facing message. Server-side failures only carry their detail
    /// when `expose_detail` is set (development mode).
    fn public_message(&self, expose_detail: bool) -> String {
        match self {
            ApiError::Validation(m) | ApiError::PayloadTooLarge(m) | ApiError::NotFound(m) => m.clone(),
            ApiError::RateLimited => RATE_LIMIT_MESSAGE.to_string(),
            ApiError::AuthenticationRequired => "Sign in to continue.".to_string(),
            ApiError::Configuration(m) | ApiError::Upstream(m) | ApiError::Unhandled(m) if expose_detail => m.clone(),
            ApiError::Configuration(_) | ApiError::Upstream(_) | ApiError::Unhandled(_) => {
                "Something went wrong while processing your request.".to_string()
            }
        }
    }

    /// Body extraction failures: oversized bodies keep their 413, anything else is a bad request.
    pub fn from_json_rejection_status(status: StatusCode, message: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(format!("request body exceeds the {} MiB limit", crate::app::MAX_BODY_BYTES / (1024 * 1024)))
        } else {
            ApiError::Validation(message)
        }
    }

    pub fn respond(self, expose_detail: bool) -> ErrorResponse {
        ErrorResponse { error: self, expose_detail }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::from_json_rejection_status(rejection.status(), rejection.body_text())
    }
}

impl From<ReplicateError> for ApiError {
    fn from(e: ReplicateError) -> Self {
        match e {
            ReplicateError::MissingToken => ApiError::Configuration(e.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

/// An [`ApiError`] paired with the detail policy of the running process.
#[derive(Debug)]
pub struct ErrorResponse {
    error: ApiError,
    expose_detail: bool,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            error!("❌ {}", self.error);
        } else {
            warn!("⚠️ {}", self.error);
        }
        let body = json!({
            "error": self.error.label(),
            "message": self.error.public_message(self.expose_detail),
        });
        (status, Json(body)).into_response()
    }
}

/// Production policy: never expose internal detail.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.respond(false).into_response()
    }
}
