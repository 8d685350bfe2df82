/// Security audit trail
///
/// Every rejection and every successful state transition of a credential is
/// written as one structured log line with the same field set:
/// `event`, `outcome`, `subject_id`, `origin`, `reason`.

use uuid::Uuid;

use crate::error::{AppError, AuthError, TokenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::Failure => "FAILURE",
        }
    }
}

/// One security event in the making
#[derive(Debug, Clone)]
pub struct SecurityEvent {
    event: &'static str,
    subject_id: Option<Uuid>,
    origin: Option<String>,
}

impl SecurityEvent {
    pub fn new(event: &'static str) -> Self {
        Self {
            event,
            subject_id: None,
            origin: None,
        }
    }

    pub fn subject(mut self, subject_id: Uuid) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Record a rejection and hand the error back to the caller
    pub fn reject(&self, err: impl Into<AppError>) -> AppError {
        let err = err.into();
        self.write(Outcome::Failure, rejection_reason(&err));
        err
    }

    pub fn succeeded(&self, detail: &str) {
        self.write(Outcome::Success, detail);
    }

    fn write(&self, outcome: Outcome, reason: &str) {
        let subject_id = self.subject_id.map(|id| id.to_string());
        match outcome {
            Outcome::Failure => tracing::warn!(
                event = self.event,
                outcome = outcome.as_str(),
                subject_id = ?subject_id,
                origin = ?self.origin,
                reason = reason,
                "Security event"
            ),
            Outcome::Success => tracing::info!(
                event = self.event,
                outcome = outcome.as_str(),
                subject_id = ?subject_id,
                origin = ?self.origin,
                reason = reason,
                "Security event"
            ),
        }
    }
}

fn rejection_reason(err: &AppError) -> &'static str {
    match err {
        AppError::Auth(e) => e.reason(),
        AppError::Token(TokenError::Expired) => "token expired",
        AppError::Token(TokenError::InvalidSignature) => "invalid signature or purpose",
        AppError::Token(TokenError::Malformed) => "malformed token",
        AppError::Token(TokenError::MissingSecret) => "signing secret missing",
        AppError::Validation(_) => "invalid input",
        AppError::Store(_) => "store failure",
        AppError::Email(_) => "email delivery failure",
        AppError::Internal(_) => "internal failure",
    }
}
