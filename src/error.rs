use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Time parse error: {0}")]
    TimeParse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error("{0}")]
    Validation(String),

    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("{0}")]
    NotFound(String),

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("too many requests")]
    RateLimited,

    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },
}

impl PaymentError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Validation(_) | PaymentError::Signature(_) => StatusCode::BAD_REQUEST,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            PaymentError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            PaymentError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::Http(_)
            | PaymentError::Json(_)
            | PaymentError::Db(_)
            | PaymentError::Postgres(_)
            | PaymentError::Io(_)
            | PaymentError::TimeParse(_)
            | PaymentError::Config(_)
            | PaymentError::Provider { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "validation_error",
            PaymentError::Signature(_) => "invalid_signature",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::InsufficientCredits => "insufficient_credits",
            PaymentError::RateLimited => "rate_limited",
            PaymentError::Unavailable(_) => "service_unavailable",
            PaymentError::Provider { .. } => "provider_error",
            PaymentError::Config(_) => "config_error",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::warn!("request rejected ({}): {}", status.as_u16(), self);
        }
        // Internal details (SQL, IO) stay in the logs.
        let message = match &self {
            PaymentError::Http(_)
            | PaymentError::Json(_)
            | PaymentError::Db(_)
            | PaymentError::Postgres(_)
            | PaymentError::Io(_)
            | PaymentError::TimeParse(_) => "internal server error".to_string(),
            PaymentError::Provider { .. } => "payment provider request failed".to_string(),
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
