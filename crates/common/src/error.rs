use thiserror::Error;
use serde::Serialize;

/// Common error type for AMP with clear taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// Caller errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// Engine lifecycle errors (5xx)
    #[error("Engine startup failed: {0}")]
    EngineStartupFailed(String),

    #[error("No text-generation engine is loaded")]
    EngineUnavailable,

    #[error("Engine request failed: {0}")]
    EngineRequestFailed(String),

    /// Opaque backend errors
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend failed: {0}")]
    BackendFailed(String),

    /// Internal errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// IO and serialization errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic anyhow error for flexibility
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            // 4xx Client Errors
            Error::InvalidRequest(_) => 400,
            Error::BackendNotFound(_) => 404,

            // 5xx Server Errors
            Error::EngineStartupFailed(_) => 503,
            Error::EngineUnavailable => 503,
            Error::EngineRequestFailed(_) => 502,
            Error::BackendUnavailable(_) => 503,
            Error::BackendFailed(_) => 500,

            // Internal Errors
            Error::ConfigError(_) => 500,
            Error::Internal(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Anyhow(_) => 500,
        }
    }

    /// Get error type for logging and error bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::BackendNotFound(_) => "backend_not_found",
            Error::EngineStartupFailed(_) => "engine_startup_failed",
            Error::EngineUnavailable => "engine_unavailable",
            Error::EngineRequestFailed(_) => "engine_request_failed",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::BackendFailed(_) => "backend_failed",
            Error::ConfigError(_) => "config_error",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Anyhow(_) => "unknown",
        }
    }

    /// Whether a caller may reasonably retry the same call.
    ///
    /// Nothing in the core retries on its own; this only informs callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::EngineStartupFailed(_) |
            Error::EngineUnavailable |
            Error::EngineRequestFailed(_) |
            Error::Io(_)
        )
    }
}

/// Error response for HTTP API
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: u16,
}

impl From<&Error> for ErrorDetail {
    fn from(err: &Error) -> Self {
        ErrorDetail {
            message: err.to_string(),
            r#type: err.error_type().to_string(),
            code: err.status_code(),
        }
    }
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        ErrorResponse {
            error: ErrorDetail::from(err),
        }
    }
}

impl From<ErrorDetail> for ErrorResponse {
    fn from(error: ErrorDetail) -> Self {
        ErrorResponse { error }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
