use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for waitlist operations
pub type Result<T> = std::result::Result<T, WaitlistError>;

/// Errors that can occur in the waitlist service
#[derive(Error, Debug)]
pub enum WaitlistError {
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Invalid phone number")]
    InvalidPhone,

    #[error("Email already on the waitlist")]
    DuplicateEmail,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Count unavailable: {0}")]
    CountUnavailable(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WaitlistError {
    /// HTTP status code and client-facing message for this error
    pub fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            WaitlistError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later.",
            ),
            WaitlistError::InvalidEmail => {
                (StatusCode::BAD_REQUEST, "Please enter a valid email address")
            }
            WaitlistError::InvalidPhone => (
                StatusCode::BAD_REQUEST,
                "Please enter a valid phone number (7-15 digits)",
            ),
            WaitlistError::DuplicateEmail => {
                (StatusCode::CONFLICT, "This email is already on the waitlist!")
            }
            WaitlistError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to add to waitlist. Please try again.",
            ),
            WaitlistError::CountUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch count")
            }
            WaitlistError::Unexpected(_)
            | WaitlistError::Config(_)
            | WaitlistError::Redis(_)
            | WaitlistError::Http(_)
            | WaitlistError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl IntoResponse for WaitlistError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let mut response = (status, Json(json!({ "error": message }))).into_response();

        if let WaitlistError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}
