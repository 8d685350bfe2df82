/// Signed token claims
///
/// Every signed token in the service is a `SignedClaims<P>`: a typed payload
/// plus the registered time claims and a purpose tag carried in `aud`. The
/// purpose tag keeps tokens minted for one use from being accepted by another
/// verifier that happens to share a secret.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload carried inside a signed token
pub trait TokenPayload: Serialize + DeserializeOwned {
    /// Written to `aud` on signing and pinned on verification
    const PURPOSE: &'static str;
    const LIFETIME_SECONDS: i64;
}

/// Claims envelope shared by every signed token purpose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedClaims<P> {
    #[serde(flatten)]
    pub payload: P,
    /// Purpose tag
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
}

impl<P: TokenPayload> SignedClaims<P> {
    pub fn new(payload: P, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            payload,
            aud: P::PURPOSE.to_string(),
            iat,
            exp: iat + P::LIFETIME_SECONDS,
            nbf: iat,
        }
    }
}

impl<P> SignedClaims<P> {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.nbf
    }

    /// Seconds until expiry, never negative
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.exp - now.timestamp()).max(0)
    }
}

/// Short-lived session identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPayload {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: String,
}

impl TokenPayload for AccessPayload {
    const PURPOSE: &'static str = "access";
    const LIFETIME_SECONDS: i64 = 15 * 60;
}

/// Long-lived rotation credential, backed by a `RefreshRecord` keyed by `jti`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPayload {
    pub user_id: Uuid,
    pub jti: Uuid,
}

impl TokenPayload for RefreshPayload {
    const PURPOSE: &'static str = "refresh";
    const LIFETIME_SECONDS: i64 = 7 * 24 * 60 * 60;
}

pub type AccessClaims = SignedClaims<AccessPayload>;
pub type RefreshClaims = SignedClaims<RefreshPayload>;
