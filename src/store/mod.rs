//! Storage collaborator
//!
//! The core reaches persistence only through a transaction handle. Every
//! read-check-write sequence of a protocol runs inside one `StoreTx`; the
//! "mark used" operations are conditional updates that report whether this
//! transaction won the row. Dropping a `StoreTx` without `commit` rolls back.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle shared by refresh records, single-use tokens and emergency records
///
/// `Issued` is the only non-terminal state; nothing is ever reactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Issued,
    Redeemed,
    Expired,
    Revoked,
}

impl TokenState {
    fn resolve(
        used_at: Option<DateTime<Utc>>,
        revoked_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        if revoked_at.is_some() {
            TokenState::Revoked
        } else if used_at.is_some() {
            TokenState::Redeemed
        } else if expires_at.map_or(false, |at| now >= at) {
            TokenState::Expired
        } else {
            TokenState::Issued
        }
    }
}

/// Server-side ledger entry of one refresh token
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRecord {
    pub jti: Uuid,
    pub user_id: Uuid,
    /// Device descriptor (user agent) captured at login
    pub device: String,
    /// Client address captured at login
    pub origin: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshRecord {
    pub fn new(
        jti: Uuid,
        user_id: Uuid,
        device: String,
        origin: String,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            jti,
            user_id,
            device,
            origin,
            expires_at: issued_at + lifetime,
            used_at: None,
            revoked_at: None,
            created_at: issued_at,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        TokenState::resolve(self.used_at, self.revoked_at, Some(self.expires_at), now)
    }
}

/// What a single-use token was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    Invitation,
    PasswordReset,
    EmailChange,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Invitation => "invitation",
            TokenPurpose::PasswordReset => "password_reset",
            TokenPurpose::EmailChange => "email_change",
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenPurpose {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invitation" => Ok(TokenPurpose::Invitation),
            "password_reset" => Ok(TokenPurpose::PasswordReset),
            "email_change" => Ok(TokenPurpose::EmailChange),
            other => Err(StoreError::Backend(format!("unknown token purpose '{}'", other))),
        }
    }
}

/// Hashed single-use token
#[derive(Debug, Clone, PartialEq)]
pub struct SingleUseToken {
    /// Lowercase hex SHA-256 of the opaque secret
    pub token_hash: String,
    pub user_id: Uuid,
    pub purpose: TokenPurpose,
    pub payload: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SingleUseToken {
    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        TokenState::resolve(self.used_at, None, Some(self.expires_at), now)
    }
}

/// Redemption ledger entry for an emergency token; expiry lives in the token
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyActionRecord {
    pub jti: Uuid,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl EmergencyActionRecord {
    pub fn new(jti: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            jti,
            created_at,
            used_at: None,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        TokenState::resolve(self.used_at, None, None, now)
    }
}

/// User account as seen by the session core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub role: String,
    /// `None` until an invitation is accepted
    pub password_hash: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub ip_allowlist_enabled: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// One unit of work against the store
#[async_trait]
pub trait StoreTx: Send {
    // refresh records, keyed by jti
    async fn insert_refresh_record(&mut self, record: &RefreshRecord) -> Result<(), StoreError>;
    async fn fetch_refresh_record(&mut self, jti: Uuid) -> Result<Option<RefreshRecord>, StoreError>;
    /// Sets `used_at` only if the record is neither used nor revoked
    async fn mark_refresh_used(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;
    async fn revoke_refresh_record(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;
    async fn revoke_user_refresh_records(
        &mut self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    // single-use tokens, keyed by hash
    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> Result<(), StoreError>;
    async fn fetch_single_use_token(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<SingleUseToken>, StoreError>;
    /// Sets `used_at` only if it is still unset
    async fn mark_single_use_token_used(
        &mut self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    /// Drops every unredeemed token of `purpose` owned by `user_id`
    async fn delete_outstanding_tokens(
        &mut self,
        user_id: Uuid,
        purpose: TokenPurpose,
    ) -> Result<u64, StoreError>;

    // emergency action ledger, keyed by jti
    async fn insert_emergency_record(&mut self, record: &EmergencyActionRecord) -> Result<(), StoreError>;
    async fn fetch_emergency_record(
        &mut self,
        jti: Uuid,
    ) -> Result<Option<EmergencyActionRecord>, StoreError>;
    async fn mark_emergency_record_used(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    // user and tenant collaborators
    async fn fetch_user(&mut self, user_id: Uuid) -> Result<Option<UserAccount>, StoreError>;
    async fn fetch_user_by_email(&mut self, email: &str) -> Result<Option<UserAccount>, StoreError>;
    async fn fetch_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError>;
    async fn activate_user(&mut self, user_id: Uuid) -> Result<bool, StoreError>;
    async fn set_password_hash(&mut self, user_id: Uuid, password_hash: &str) -> Result<bool, StoreError>;
    async fn set_email(&mut self, user_id: Uuid, email: &str) -> Result<bool, StoreError>;
    async fn set_tenant_ip_allowlist(&mut self, tenant_id: Uuid, enabled: bool) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
