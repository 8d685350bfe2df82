/// Error Handling Module
///
/// One error system for the credential and session core:
/// 1. Domain error types (token codec, session protocol, storage, email, config)
/// 2. The unified `AppError` used for control flow
/// 3. HTTP response mapping that collapses security rejections
/// 4. Error context enrichment for server-side logging
///
/// Security-relevant rejections are deliberately coarse on the wire. The
/// detailed reason travels inside the error and is written to the log.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Input validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyField(&'static str),
    TooShort(&'static str, usize),
    TooLong(&'static str, usize),
    InvalidFormat(&'static str),
    WeakPassword,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is empty", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} is too short (minimum {} characters)", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
            ValidationError::WeakPassword => write!(
                f,
                "password must contain at least one digit, one lowercase letter, and one uppercase letter"
            ),
        }
    }
}

impl StdError for ValidationError {}

/// Signed token codec errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Token could not be parsed or its claims are not usable yet
    Malformed,
    /// Wrong secret, unexpected algorithm or wrong purpose
    InvalidSignature,
    Expired,
    /// Signing or verifying was attempted with an empty secret
    MissingSecret,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "Malformed token"),
            TokenError::InvalidSignature => write!(f, "Invalid token signature"),
            TokenError::Expired => write!(f, "Token has expired"),
            TokenError::MissingSecret => write!(f, "Signing secret is not configured"),
        }
    }
}

impl StdError for TokenError {}

/// Session protocol and single-use token rejections
///
/// `Unauthenticated` carries the internal reason. It is logged, never sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    Unauthenticated(&'static str),
    ReplayDetected,
    InvalidOrExpired,
    ActionMismatch,
    OwnerMismatch,
    AlreadyUsed,
    Conflict,
    TooManyAttempts,
}

impl AuthError {
    /// Internal reason, suitable for audit logs only
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated(reason) => reason,
            AuthError::ReplayDetected => "refresh token replayed after rotation",
            AuthError::InvalidOrExpired => "token not found, used or expired",
            AuthError::ActionMismatch => "token minted for a different action",
            AuthError::OwnerMismatch => "token belongs to a different user",
            AuthError::AlreadyUsed => "token already redeemed",
            AuthError::Conflict => "concurrent redemption",
            AuthError::TooManyAttempts => "rate limit exceeded",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Unauthenticated(reason) => write!(f, "Unauthenticated: {}", reason),
            AuthError::ReplayDetected => write!(f, "Refresh token replay detected"),
            AuthError::InvalidOrExpired => write!(f, "Invalid or expired token"),
            AuthError::ActionMismatch => write!(f, "Token action mismatch"),
            AuthError::OwnerMismatch => write!(f, "Token owner mismatch"),
            AuthError::AlreadyUsed => write!(f, "Token already used"),
            AuthError::Conflict => write!(f, "Token redemption conflict"),
            AuthError::TooManyAttempts => write!(f, "Too many attempts"),
        }
    }
}

impl StdError for AuthError {}

/// Storage collaborator errors
///
/// A closed set of kinds, so callers never inspect driver-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    Conflict(String),
    Unavailable(String),
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "Record not found"),
            StoreError::Conflict(msg) => write!(f, "Duplicate entry: {}", msg),
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            StoreError::Backend(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl StdError for StoreError {}

/// Email service errors
#[derive(Debug, Clone)]
pub enum EmailError {
    SendFailed(String),
    InvalidRecipient(String),
    ServiceUnavailable(String),
}

impl fmt::Display for EmailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmailError::SendFailed(msg) => write!(f, "Failed to send email: {}", msg),
            EmailError::InvalidRecipient(msg) => write!(f, "Invalid recipient: {}", msg),
            EmailError::ServiceUnavailable(msg) => {
                write!(f, "Email service unavailable: {}", msg)
            }
        }
    }
}

impl StdError for EmailError {}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
    ParseError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Config parse error: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Token(TokenError),
    Auth(AuthError),
    Store(StoreError),
    Email(EmailError),
    Internal(String),
}

impl AppError {
    /// True for rejections caused by the presented credential, as opposed to
    /// failures of the service itself
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Token(_) | AppError::Auth(_) | AppError::Validation(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Token(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Store(e) => write!(f, "{}", e),
            AppError::Email(e) => write!(f, "{}", e),
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

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Token(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        AppError::Email(err)
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response body
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for correlating with server logs
    pub error_id: String,
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

/// Converts errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

const UNAUTHENTICATED_MESSAGE: &str = "Authentication required";
const INVALID_LINK_MESSAGE: &str = "Invalid or expired link";

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = match self {
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()),

            // Every session failure looks the same from outside
            AppError::Token(_)
            | AppError::Auth(AuthError::Unauthenticated(_))
            | AppError::Auth(AuthError::ReplayDetected) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                UNAUTHENTICATED_MESSAGE.to_string(),
            ),
            AppError::Auth(AuthError::InvalidOrExpired) => (
                StatusCode::BAD_REQUEST,
                "INVALID_OR_EXPIRED",
                INVALID_LINK_MESSAGE.to_string(),
            ),
            AppError::Auth(AuthError::ActionMismatch) | AppError::Auth(AuthError::OwnerMismatch) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                INVALID_LINK_MESSAGE.to_string(),
            ),
            AppError::Auth(AuthError::AlreadyUsed) | AppError::Auth(AuthError::Conflict) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                INVALID_LINK_MESSAGE.to_string(),
            ),
            AppError::Auth(AuthError::TooManyAttempts) => (
                StatusCode::TOO_MANY_REQUESTS,
                "TOO_MANY_ATTEMPTS",
                "Too many attempts, try again later".to_string(),
            ),

            AppError::Store(StoreError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Service temporarily unavailable".to_string(),
            ),
            AppError::Store(StoreError::Conflict(_)) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                "Resource already exists".to_string(),
            ),
            AppError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
            AppError::Email(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "EMAIL_SERVICE_ERROR",
                "Email service temporarily unavailable".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
        };

        let error_response = ErrorResponse::new(
            request_id.to_string(),
            message,
            code.to_string(),
            status.as_u16(),
        );

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::Token(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Token rejected");
            }
            AppError::Auth(e) => {
                tracing::warn!(
                    request_id = request_id,
                    error = %e,
                    reason = e.reason(),
                    "Authentication rejected"
                );
            }
            AppError::Store(e) => {
                tracing::error!(request_id = request_id, error = %e, "Store error");
            }
            AppError::Email(e) => {
                tracing::error!(request_id = request_id, error = %e, "Email service error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

/// Implement ResponseError for Actix-web integration
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        <Self as ErrorHandler>::error_response(self, "").0
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Error context for enhanced logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<String>,
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

    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn log_error(&self, error: &AppError) {
        if error.is_rejection() {
            tracing::warn!(
                request_id = %self.request_id,
                operation = %self.operation,
                user_id = ?self.user_id,
                error = %error,
                "Request rejected"
            );
        } else {
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
