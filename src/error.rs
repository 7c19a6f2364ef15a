use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Why a presented check-in token was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// The token could not be decoded into a payload and signature.
    #[error("malformed token")]
    Malformed,

    /// The signature does not match the payload under the current key.
    #[error("bad signature")]
    BadSignature,

    /// The token is outside its validity window (too old or from the future).
    #[error("token expired")]
    Expired,

    /// Too many validation attempts for the session in the current window.
    #[error("rate limited")]
    RateLimited,
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A pool construction error.
    #[error("Pool creation error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A rejected check-in token.
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    /// The caller is not eligible for the requested session.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The student is already marked present for the session.
    #[error("Already checked in")]
    AlreadyCheckedIn,

    /// A dependency timed out or failed.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A row was missing an expected column.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The stable, client-facing discriminator for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidToken(TokenError::Malformed | TokenError::BadSignature) => {
                "invalid_token"
            }
            AppError::InvalidToken(TokenError::Expired) => "token_expired",
            AppError::InvalidToken(TokenError::RateLimited) => "rate_limited",
            AppError::AccessDenied(_) => "access_denied",
            AppError::AlreadyCheckedIn => "already_checked_in",
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::CreatePool(_)
            | AppError::Redis(_)
            | AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::Authentication(_) => "unauthorized",
            AppError::Unauthorized => "forbidden",
            AppError::NotFound => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::MissingData(_) | AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether the client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Redis(_)
                | AppError::ServiceUnavailable(_)
                | AppError::InvalidToken(TokenError::RateLimited)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::CreatePool(ref e) => {
                tracing::error!("Pool creation error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::ServiceUnavailable(ref msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            // Malformed and forged tokens read the same to the client.
            AppError::InvalidToken(TokenError::Malformed | TokenError::BadSignature) => {
                (StatusCode::BAD_REQUEST, "Invalid QR code. Please scan again".to_string())
            }

            AppError::InvalidToken(TokenError::Expired) => (
                StatusCode::GONE,
                "QR code expired. Ask for a fresh code".to_string(),
            ),

            AppError::InvalidToken(TokenError::RateLimited) => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many attempts. Please wait and try again".to_string(),
            ),

            AppError::AccessDenied(ref msg) => {
                tracing::info!("Access denied: {}", msg);
                (StatusCode::FORBIDDEN, msg.clone())
            }

            AppError::AlreadyCheckedIn => {
                (StatusCode::CONFLICT, "Student has already checked in".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::MissingData(ref msg) => {
                tracing::error!("Missing column in row: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": message,
                "retryable": self.is_retryable(),
            }
        }))
        .unwrap_or_else(|_| {
            r#"{"success":false,"error":{"kind":"internal_error","message":"Internal server error","retryable":false}}"#
                .to_string()
        });

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
