use log::{error, info, warn};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("request was canceled")]
    Canceled,
}

impl ApiError {
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::FORBIDDEN => ApiError::Forbidden(message),
            _ => ApiError::Http {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Aborted or superseded requests are not failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ApiError::Canceled)
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, ApiError::Forbidden(_))
    }

    /// Logs at a severity matching the failure class.
    pub fn log(&self, context: &str) {
        match self {
            ApiError::Canceled => {}
            ApiError::Forbidden(msg) => warn!("🚫 403 Forbidden - {}: {}", context, msg),
            ApiError::Http { status: 404, message } => {
                info!("🔍 404 Not Found - {}: {}", context, message)
            }
            ApiError::Http { status, message } if *status < 500 => {
                warn!("📝 {} - {}: {}", status, context, message)
            }
            ApiError::Http { status, message } => {
                error!("💥 {} - {}: {}", status, context, message)
            }
            ApiError::Network(msg) => error!("📡 network failure - {}: {}", context, msg),
            ApiError::Decode(msg) => error!("📋 bad payload - {}: {}", context, msg),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ApiError::Decode(e.to_string());
        }
        match e.status() {
            Some(status) => ApiError::from_status(status, e.to_string()),
            None => ApiError::Network(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
