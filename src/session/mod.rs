//! Session manager
//!
//! Stateful half of the session core. Access tokens are checked statelessly;
//! refresh tokens are exchanged exactly once against their `RefreshRecord`,
//! and a second exchange of the same token is reported as a replay.

pub mod carriers;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::SecurityEvent;
use crate::auth::{
    issue_access, issue_refresh, verify_access, verify_against_dummy, verify_password,
    verify_refresh, AccessClaims, RefreshPayload, TokenPayload,
};
use crate::clock::Clock;
use crate::error::{AppError, AuthError, TokenError};
use crate::rate_limit::RateLimiter;
use crate::store::{RefreshRecord, Store, StoreTx, UserAccount};

/// Resolved identity handed to request handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: String,
}

impl From<AccessClaims> for Session {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.payload.user_id,
            tenant_id: claims.payload.tenant_id,
            role: claims.payload.role,
        }
    }
}

/// Freshly issued access and refresh tokens
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub access_expires_in: i64,
    pub refresh_token: String,
    pub refresh_jti: Uuid,
}

/// Where a request came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    /// User agent
    pub device: String,
    /// Peer address
    pub origin: String,
}

impl ClientContext {
    pub fn new(device: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            origin: origin.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Authenticated {
    /// The presented access token was valid
    Current(Session),
    /// The refresh token was exchanged; the new pair must reach the client
    Rotated(Session, TokenPair),
}

impl Authenticated {
    pub fn session(&self) -> &Session {
        match self {
            Authenticated::Current(session) | Authenticated::Rotated(session, _) => session,
        }
    }

    pub fn into_parts(self) -> (Session, Option<TokenPair>) {
        match self {
            Authenticated::Current(session) => (session, None),
            Authenticated::Rotated(session, pair) => (session, Some(pair)),
        }
    }
}

fn refresh_lifetime() -> Duration {
    Duration::seconds(RefreshPayload::LIFETIME_SECONDS)
}

pub struct SessionManager {
    store: Arc<dyn Store>,
    limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    secret: String,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            limiter,
            clock,
            secret: secret.into(),
        }
    }

    pub fn verify_access(&self, token: &str) -> Result<Session, TokenError> {
        verify_access(token, &self.secret, self.clock.now()).map(Session::from)
    }

    /// Resolve the caller from its carriers, rotating when the access token
    /// is missing or no longer valid
    pub async fn authenticate(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        client: &ClientContext,
    ) -> Result<Authenticated, AppError> {
        if let Some(token) = access_token {
            match self.verify_access(token) {
                Ok(session) => return Ok(Authenticated::Current(session)),
                Err(e) => tracing::debug!(error = %e, "Access token rejected, falling back to refresh"),
            }
        }

        let refresh_token = refresh_token.ok_or_else(|| {
            SecurityEvent::new("session_authenticate")
                .origin(client.origin.as_str())
                .reject(AuthError::Unauthenticated("no session carrier presented"))
        })?;

        let (session, pair) = self.rotate(refresh_token, client).await?;
        Ok(Authenticated::Rotated(session, pair))
    }

    /// Exchange a refresh token for a new pair, exactly once
    pub async fn rotate(
        &self,
        refresh_token: &str,
        client: &ClientContext,
    ) -> Result<(Session, TokenPair), AppError> {
        let event = SecurityEvent::new("refresh_rotation").origin(client.origin.as_str());

        if !self.limiter.allow(&client.origin) {
            return Err(event.reject(AuthError::TooManyAttempts));
        }

        let now = self.clock.now();
        let claims = verify_refresh(refresh_token, &self.secret, now).map_err(|e| match e {
            TokenError::Expired => event.reject(e),
            other => {
                tracing::debug!(error = %other, "Refresh token failed verification");
                event.reject(AuthError::Unauthenticated("refresh token failed verification"))
            }
        })?;
        let user_id = claims.payload.user_id;
        let event = event.subject(user_id);

        let mut tx = self.store.begin().await?;

        let record = tx
            .fetch_refresh_record(claims.payload.jti)
            .await?
            .ok_or_else(|| event.reject(AuthError::Unauthenticated("refresh record not found")))?;
        if record.user_id != user_id {
            return Err(event.reject(AuthError::Unauthenticated(
                "refresh record owned by another user",
            )));
        }
        if now >= record.expires_at {
            return Err(event.reject(AuthError::Unauthenticated("refresh record expired")));
        }
        if record.revoked_at.is_some() {
            return Err(event.reject(AuthError::Unauthenticated("refresh record revoked")));
        }
        if record.used_at.is_some() {
            return Err(event.reject(AuthError::ReplayDetected));
        }
        if !tx.mark_refresh_used(record.jti, now).await? {
            return Err(event.reject(AuthError::ReplayDetected));
        }

        let user = active_account(&mut *tx, user_id)
            .await
            .map_err(|e| event.reject(e))?;
        let (session, pair) = self.issue_pair(&user, now)?;

        let successor = RefreshRecord::new(
            pair.refresh_jti,
            user.id,
            record.device,
            record.origin,
            now,
            refresh_lifetime(),
        );
        tx.insert_refresh_record(&successor).await?;
        tx.commit().await?;

        event.succeeded("refresh token rotated");
        Ok((session, pair))
    }

    /// Verify credentials and open a session
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientContext,
    ) -> Result<(Session, TokenPair), AppError> {
        let event = SecurityEvent::new("login").origin(client.origin.as_str());

        let mut tx = self.store.begin().await?;
        let user = tx.fetch_user_by_email(email).await?;
        // bcrypt runs outside the transaction
        drop(tx);

        let user = match user {
            Some(user) => user,
            None => {
                verify_against_dummy(password);
                return Err(event.reject(AuthError::Unauthenticated("unknown email")));
            }
        };
        let event = event.subject(user.id);

        let password_hash = match user.password_hash.as_deref() {
            Some(hash) => hash,
            None => {
                verify_against_dummy(password);
                return Err(event.reject(AuthError::Unauthenticated("no password set")));
            }
        };
        if !verify_password(password, password_hash)? {
            return Err(event.reject(AuthError::Unauthenticated("wrong password")));
        }

        self.establish(user.id, client).await
    }

    /// Issue the first pair of a session and record its refresh token
    pub async fn establish(
        &self,
        user_id: Uuid,
        client: &ClientContext,
    ) -> Result<(Session, TokenPair), AppError> {
        let event = SecurityEvent::new("session_established")
            .subject(user_id)
            .origin(client.origin.as_str());
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let user = active_account(&mut *tx, user_id)
            .await
            .map_err(|e| event.reject(e))?;
        let (session, pair) = self.issue_pair(&user, now)?;

        let record = RefreshRecord::new(
            pair.refresh_jti,
            user.id,
            client.device.clone(),
            client.origin.clone(),
            now,
            refresh_lifetime(),
        );
        tx.insert_refresh_record(&record).await?;
        tx.commit().await?;

        event.succeeded("session established");
        Ok((session, pair))
    }

    /// Revoke the record behind a refresh token
    pub async fn logout(&self, refresh_token: &str, client: &ClientContext) -> Result<(), AppError> {
        let event = SecurityEvent::new("logout").origin(client.origin.as_str());
        let now = self.clock.now();

        let claims = verify_refresh(refresh_token, &self.secret, now).map_err(|_| {
            event.reject(AuthError::Unauthenticated("refresh token failed verification"))
        })?;
        let event = event.subject(claims.payload.user_id);

        let mut tx = self.store.begin().await?;
        let record = tx
            .fetch_refresh_record(claims.payload.jti)
            .await?
            .ok_or_else(|| event.reject(AuthError::Unauthenticated("refresh record not found")))?;
        if record.user_id != claims.payload.user_id {
            return Err(event.reject(AuthError::Unauthenticated(
                "refresh record owned by another user",
            )));
        }
        tx.revoke_refresh_record(record.jti, now).await?;
        tx.commit().await?;

        event.succeeded("refresh record revoked");
        Ok(())
    }

    /// Revoke every refresh record of a user
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut tx = self.store.begin().await?;
        let revoked = tx.revoke_user_refresh_records(user_id, self.clock.now()).await?;
        tx.commit().await?;

        tracing::info!(user_id = %user_id, revoked = revoked, "Refresh records revoked");
        SecurityEvent::new("logout_all")
            .subject(user_id)
            .succeeded("all refresh records revoked");
        Ok(revoked)
    }

    fn issue_pair(
        &self,
        user: &UserAccount,
        now: DateTime<Utc>,
    ) -> Result<(Session, TokenPair), TokenError> {
        let (access_token, access_expires_in) =
            issue_access(user.id, user.tenant_id, &user.role, &self.secret, now)?;
        let (refresh_token, refresh_jti) = issue_refresh(user.id, &self.secret, now)?;

        let session = Session {
            user_id: user.id,
            tenant_id: user.tenant_id,
            role: user.role.clone(),
        };
        let pair = TokenPair {
            access_token,
            access_expires_in,
            refresh_token,
            refresh_jti,
        };
        Ok((session, pair))
    }
}

/// The user and its tenant must both exist and be active
async fn active_account(tx: &mut dyn StoreTx, user_id: Uuid) -> Result<UserAccount, AppError> {
    let user = tx
        .fetch_user(user_id)
        .await?
        .ok_or(AuthError::Unauthenticated("user not found"))?;
    if !user.is_active {
        return Err(AuthError::Unauthenticated("user inactive").into());
    }

    let tenant = tx
        .fetch_tenant(user.tenant_id)
        .await?
        .ok_or(AuthError::Unauthenticated("tenant not found"))?;
    if !tenant.is_active {
        return Err(AuthError::Unauthenticated("tenant inactive").into());
    }

    Ok(user)
}
