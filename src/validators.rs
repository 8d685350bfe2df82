/// Input validators
///
/// Email addresses arrive from login, password reset and email change
/// requests; everything else the core accepts is a token it verifies itself.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MAX_LOCAL_PART_LENGTH: usize = 64;

lazy_static! {
    // RFC 5322 simplified
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
    )
    .unwrap();
}

/// Validate an email address and return it trimmed
pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email"));
    }

    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email", MIN_EMAIL_LENGTH));
    }

    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email", MAX_EMAIL_LENGTH));
    }

    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email"));
    }

    match trimmed.split_once('@') {
        Some((local, _)) if local.len() <= MAX_LOCAL_PART_LENGTH => Ok(trimmed.to_string()),
        _ => Err(ValidationError::InvalidFormat("email")),
    }
}

/// Reject empty token parameters before they reach a lookup
pub fn is_present_token(token: &str) -> Result<&str, ValidationError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("token"));
    }
    Ok(trimmed)
}
