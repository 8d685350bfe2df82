/// JWT Token Codec
///
/// Stateless HS256 signing and verification of `SignedClaims<P>`.
/// Verification pins the algorithm and the purpose tag instead of trusting
/// the token header, and checks time claims against the caller's clock.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{
    AccessClaims, AccessPayload, RefreshClaims, RefreshPayload, SignedClaims, TokenPayload,
};
use crate::error::TokenError;

const PINNED_ALGORITHM: Algorithm = Algorithm::HS256;

/// Sign a payload for its purpose
///
/// # Errors
/// `MissingSecret` if `secret` is empty
pub fn sign<P: TokenPayload>(
    payload: P,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(String, SignedClaims<P>), TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }

    let claims = SignedClaims::new(payload, now);
    let token = encode(
        &Header::new(PINNED_ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(purpose = P::PURPOSE, error = %e, "Token signing failed");
        TokenError::Malformed
    })?;

    Ok((token, claims))
}

/// Verify a token and return its claims
///
/// # Errors
/// - `InvalidSignature` for a wrong secret, a non-HS256 header or a token
///   minted for another purpose
/// - `Expired` once `now` reaches `exp`
/// - `Malformed` if the token cannot be parsed or is not yet valid
pub fn verify<P: TokenPayload>(
    token: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<SignedClaims<P>, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }

    let mut validation = Validation::new(PINNED_ALGORITHM);
    // Time claims are checked below against the injected clock
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.leeway = 0;
    validation.set_audience(&[P::PURPOSE]);
    validation.set_required_spec_claims(&["exp", "nbf", "aud"]);

    // Decoded untyped first so the purpose check runs before the payload
    // shape is looked at
    let raw = decode::<serde_json::Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        let kind = classify(e.kind());
        tracing::debug!(purpose = P::PURPOSE, error = %e, "JWT validation error");
        kind
    })?;
    let claims: SignedClaims<P> = serde_json::from_value(raw).map_err(|e| {
        tracing::debug!(purpose = P::PURPOSE, error = %e, "JWT payload does not match purpose");
        TokenError::Malformed
    })?;

    if claims.is_expired_at(now) {
        return Err(TokenError::Expired);
    }
    if !claims.is_active_at(now) {
        return Err(TokenError::Malformed);
    }

    Ok(claims)
}

fn classify(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidAudience => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    }
}

/// Issue a 15-minute access token
///
/// Returns the token and its lifetime in seconds.
pub fn issue_access(
    user_id: Uuid,
    tenant_id: Uuid,
    role: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(String, i64), TokenError> {
    let payload = AccessPayload {
        user_id,
        tenant_id,
        role: role.to_string(),
    };
    let (token, claims) = sign(payload, secret, now)?;
    Ok((token, claims.exp - claims.iat))
}

/// Issue a 7-day refresh token with a fresh `jti`
pub fn issue_refresh(
    user_id: Uuid,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(String, Uuid), TokenError> {
    let jti = Uuid::new_v4();
    let (token, _) = sign(RefreshPayload { user_id, jti }, secret, now)?;
    Ok((token, jti))
}

pub fn verify_access(token: &str, secret: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
    verify::<AccessPayload>(token, secret, now)
}

pub fn verify_refresh(
    token: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<RefreshClaims, TokenError> {
    verify::<RefreshPayload>(token, secret, now)
}
