//! # Error Handling
//!
//! Defines the application error taxonomy and how each error is converted to
//! an HTTP response for the REST surface.
//!
//! ## Error Categories:
//! - **Device**: capture or playback device unavailable/denied. Fatal to
//!   session start, surfaced to the caller, never retried.
//! - **Transport**: upstream agent connection failure (connect, timeout,
//!   protocol). Drives the session to Closed, never retried automatically.
//! - **Decode**: malformed audio payload from the upstream agent. Logged and
//!   the single message dropped; the session keeps running.
//! - **BadRequest / NotFound / Validation**: client-side problems (4xx).
//! - **Internal / Config**: server-side problems (5xx).

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// The first three variants form the session error taxonomy; the rest cover
/// the HTTP surface. Each variant carries a human-readable message.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Audio capture/playback device unavailable or permission denied
    Device(String),

    /// Upstream agent connection failed (connect, open timeout, socket error)
    Transport(String),

    /// Malformed audio payload received from the upstream agent
    Decode(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Internal server errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Device(msg) => write!(f, "Device error: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::Decode(msg) => write!(f, "Decode error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Conversion of application errors into HTTP responses.
///
/// ## Status Code Mapping:
/// - Device → 503 (the microphone/speaker is a server-side resource here)
/// - Transport → 502 (upstream agent unreachable)
/// - Decode/Internal/Config → 500
/// - BadRequest/Validation → 400
/// - NotFound → 404
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "device_error",
///     "message": "no input device available",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Device(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "device_error",
                msg.clone(),
            ),
            AppError::Transport(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "transport_error",
                msg.clone(),
            ),
            AppError::Decode(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "decode_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always malformed client data, so they map
/// to BadRequest rather than Internal.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Internal(format!("HTTP client error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
