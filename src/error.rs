/// Error Handling Module
///
/// Unified error handling for the authentication core:
/// 1. Domain-specific error enums (validation, auth, database, configuration)
/// 2. A single `AppError` used for control flow with `?`
/// 3. HTTP response mapping with structured logging
/// 4. Error context enrichment for handlers

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Malformed or missing request input
#[derive(Debug, Clone)]
pub enum ValidationError {
    EmptyField(&'static str),
    MalformedBody(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is required", field),
            ValidationError::MalformedBody(msg) => write!(f, "invalid request body: {}", msg),
        }
    }
}

impl StdError for ValidationError {}

/// Storage errors surfaced by the ledger and the user directory
#[derive(Debug)]
pub enum DatabaseError {
    UniqueConstraintViolation(String),
    NotFound(String),
    ConnectionPool(String),
    UnexpectedError(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::UniqueConstraintViolation(msg) => {
                write!(f, "Duplicate entry: {}", msg)
            }
            DatabaseError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
            DatabaseError::UnexpectedError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

/// Invalid settings detected at startup
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

/// Authentication and authorization errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown username or wrong password. Never says which.
    InvalidCredentials,
    /// Bad signature, malformed, expired, wrong issuer or unknown subject.
    TokenInvalid,
    /// A refresh token that was already revoked was presented again.
    TokenReused,
    MissingToken,
    MissingSecurityContext,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid username or password"),
            AuthError::TokenInvalid => write!(f, "Invalid or expired token"),
            AuthError::TokenReused => write!(f, "Refresh token reuse detected"),
            AuthError::MissingToken => write!(f, "Missing authentication token"),
            AuthError::MissingSecurityContext => write!(f, "Security context missing"),
        }
    }
}

impl StdError for AuthError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Database(DatabaseError),
    Auth(AuthError),
    Config(ConfigError),
    Internal(String),
}

impl AppError {
    /// True for a missing ledger or user row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::Database(DatabaseError::NotFound(_)))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

/// SQLSTATE for unique_violation
const PG_UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        match err {
            sqlx::Error::RowNotFound => {
                AppError::Database(DatabaseError::NotFound("Record not found".to_string()))
            }
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) =>
            {
                AppError::Database(DatabaseError::UniqueConstraintViolation(
                    db_err.message().to_string(),
                ))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Database(DatabaseError::ConnectionPool(message))
            }
            _ => AppError::Database(DatabaseError::UnexpectedError(message)),
        }
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    pub status: u16,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = match self {
            AppError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST".to_string(),
                e.to_string(),
            ),

            AppError::Database(e) => match e {
                DatabaseError::UniqueConstraintViolation(_) => (
                    StatusCode::CONFLICT,
                    "DUPLICATE_ENTRY".to_string(),
                    "Record already exists".to_string(),
                ),
                DatabaseError::NotFound(_) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND".to_string(),
                    "Not found".to_string(),
                ),
                DatabaseError::ConnectionPool(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE".to_string(),
                    "Database service temporarily unavailable".to_string(),
                ),
                DatabaseError::UnexpectedError(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR".to_string(),
                    "Database error occurred".to_string(),
                ),
            },

            // Token failures share one message so callers cannot tell
            // signature, expiry and revocation apart.
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials => (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_CREDENTIALS".to_string(),
                    e.to_string(),
                ),
                AuthError::TokenInvalid | AuthError::TokenReused => (
                    StatusCode::UNAUTHORIZED,
                    "TOKEN_INVALID".to_string(),
                    AuthError::TokenInvalid.to_string(),
                ),
                AuthError::MissingToken => (
                    StatusCode::UNAUTHORIZED,
                    "MISSING_TOKEN".to_string(),
                    e.to_string(),
                ),
                AuthError::MissingSecurityContext => (
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED".to_string(),
                    "Unauthorized".to_string(),
                ),
            },

            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR".to_string(),
                "Server configuration error".to_string(),
            ),

            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                "Something went wrong".to_string(),
            ),
        };

        let error_response =
            ErrorResponse::new(request_id.to_string(), message, code, status.as_u16());

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                tracing::warn!(request_id = request_id, error = %self, "Duplicate entry attempt");
            }
            AppError::Database(e) => {
                tracing::error!(request_id = request_id, error = %e, "Database error");
            }
            AppError::Auth(AuthError::TokenReused) => {
                tracing::warn!(
                    request_id = request_id,
                    error = %self,
                    "Rejected reused refresh token"
                );
            }
            AppError::Auth(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Authentication error");
            }
            AppError::Config(e) => {
                tracing::error!(request_id = request_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(e) => match e {
                DatabaseError::UniqueConstraintViolation(_) => StatusCode::CONFLICT,
                DatabaseError::NotFound(_) => StatusCode::NOT_FOUND,
                DatabaseError::ConnectionPool(_) => StatusCode::SERVICE_UNAVAILABLE,
                DatabaseError::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Per-operation context for structured logs
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<i64>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn log_error(&self, error: &AppError) {
        match error {
            AppError::Validation(_) | AppError::Auth(_) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    user_id = ?self.user_id,
                    error = %error,
                    "Request rejected"
                );
            }
            _ => {
                tracing::error!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    user_id = ?self.user_id,
                    error = %error,
                    "Request failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::EmptyField("username");
        assert_eq!(err.to_string(), "username is required");
    }

    #[test]
    fn test_token_failures_share_public_message() {
        let (invalid_status, invalid) = ErrorHandler::error_response(
            &AppError::Auth(AuthError::TokenInvalid),
            "req-1",
        );
        let (reused_status, reused) = ErrorHandler::error_response(
            &AppError::Auth(AuthError::TokenReused),
            "req-2",
        );

        assert_eq!(invalid_status, StatusCode::UNAUTHORIZED);
        assert_eq!(reused_status, StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.message, reused.message);
        assert_eq!(invalid.code, reused.code);
    }

    #[test]
    fn test_status_codes() {
        let cases = vec![
            (AppError::from(ValidationError::EmptyField("password")), 400),
            (AppError::from(AuthError::InvalidCredentials), 401),
            (AppError::from(AuthError::MissingSecurityContext), 401),
            (AppError::from(DatabaseError::NotFound("x".into())), 404),
            (AppError::from(DatabaseError::UniqueConstraintViolation("x".into())), 409),
            (AppError::Internal("boom".into()), 500),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{}", err);
        }
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_context_creation() {
        let ctx = ErrorContext::new("token_refresh");
        assert_eq!(ctx.operation, "token_refresh");
        assert!(ctx.user_id.is_none());

        let ctx = ctx.with_user_id(7);
        assert_eq!(ctx.user_id, Some(7));
    }
}
