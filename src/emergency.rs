//! Emergency action tokens
//!
//! A signed token names one action for one user. The signature and expiry
//! live in the token; the only server-side state is a ledger row per `jti`
//! recording whether it has been redeemed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::SecurityEvent;
use crate::auth::{sign, verify, TokenPayload};
use crate::clock::Clock;
use crate::error::{AppError, AuthError, StoreError};
use crate::session::Session;
use crate::single_use::IssuedLink;
use crate::store::{EmergencyActionRecord, Store, StoreTx};

pub const DISABLE_IP_ALLOWLIST: &str = "disable_ip_allowlist";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyPayload {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub action: String,
    pub jti: Uuid,
}

impl TokenPayload for EmergencyPayload {
    const PURPOSE: &'static str = "emergency";
    const LIFETIME_SECONDS: i64 = 30 * 60;
}

/// Side effect unlocked by an emergency token
#[async_trait]
pub trait EmergencyAction: Send + Sync {
    const ACTION: &'static str;

    async fn apply(&self, tx: &mut dyn StoreTx, claims: &EmergencyPayload) -> Result<(), AppError>;
}

/// Turns the tenant's IP allow-list off, for admins locked out by it
pub struct DisableIpAllowlist;

#[async_trait]
impl EmergencyAction for DisableIpAllowlist {
    const ACTION: &'static str = DISABLE_IP_ALLOWLIST;

    async fn apply(&self, tx: &mut dyn StoreTx, claims: &EmergencyPayload) -> Result<(), AppError> {
        if !tx.set_tenant_ip_allowlist(claims.tenant_id, false).await? {
            return Err(AuthError::InvalidOrExpired.into());
        }
        tracing::warn!(tenant_id = %claims.tenant_id, user_id = %claims.user_id, "IP allow-list disabled by emergency token");
        Ok(())
    }
}

pub struct EmergencyTokens {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    secret: String,
}

impl EmergencyTokens {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, secret: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            secret: secret.into(),
        }
    }

    /// Sign a token for `action` and open its ledger row
    pub async fn mint(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        action: &str,
    ) -> Result<(String, Uuid), AppError> {
        let mut tx = self.store.begin().await?;
        let minted = self.mint_in(&mut *tx, user_id, tenant_id, action).await?;
        tx.commit().await?;
        Ok(minted)
    }

    async fn mint_in(
        &self,
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        tenant_id: Uuid,
        action: &str,
    ) -> Result<(String, Uuid), AppError> {
        let now = self.clock.now();
        let jti = Uuid::new_v4();
        let payload = EmergencyPayload {
            user_id,
            tenant_id,
            action: action.to_string(),
            jti,
        };
        let (token, _) = sign(payload, &self.secret, now)?;
        tx.insert_emergency_record(&EmergencyActionRecord::new(jti, now))
            .await?;

        tracing::info!(user_id = %user_id, tenant_id = %tenant_id, action = action, jti = %jti, "Emergency token minted");
        Ok((token, jti))
    }

    /// Redeem `token` for `action` on behalf of the session's user
    ///
    /// Checks run in a fixed order: token validity, action, owner, ledger.
    pub async fn redeem<A: EmergencyAction>(
        &self,
        token: &str,
        action: &A,
        session: &Session,
        origin: &str,
    ) -> Result<(), AppError> {
        let event = SecurityEvent::new("emergency_redeem")
            .subject(session.user_id)
            .origin(origin);
        let now = self.clock.now();

        let claims = verify::<EmergencyPayload>(token, &self.secret, now).map_err(|e| {
            tracing::debug!(error = %e, "Emergency token failed verification");
            event.reject(AuthError::InvalidOrExpired)
        })?;
        let claims = claims.payload;

        if claims.action != A::ACTION {
            return Err(event.reject(AuthError::ActionMismatch));
        }
        if claims.user_id != session.user_id {
            return Err(event.reject(AuthError::OwnerMismatch));
        }

        let mut tx = self.store.begin().await?;
        let record = tx
            .fetch_emergency_record(claims.jti)
            .await?
            .ok_or_else(|| event.reject(AuthError::InvalidOrExpired))?;
        if record.used_at.is_some() {
            return Err(event.reject(AuthError::AlreadyUsed));
        }
        if !tx.mark_emergency_record_used(claims.jti, now).await? {
            return Err(event.reject(AuthError::Conflict));
        }

        action
            .apply(&mut *tx, &claims)
            .await
            .map_err(|e| event.reject(e))?;
        tx.commit().await?;

        event.succeeded(A::ACTION);
        Ok(())
    }

    /// Switch the session's tenant to allow-list mode and mint the token
    /// that can switch it back
    ///
    /// The returned link is addressed to the session's user.
    pub async fn enable_ip_allowlist(&self, session: &Session) -> Result<IssuedLink, AppError> {
        let mut tx = self.store.begin().await?;
        let user = tx
            .fetch_user(session.user_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if !tx.set_tenant_ip_allowlist(session.tenant_id, true).await? {
            return Err(StoreError::NotFound.into());
        }
        let (token, _) = self
            .mint_in(&mut *tx, session.user_id, session.tenant_id, DISABLE_IP_ALLOWLIST)
            .await?;
        tx.commit().await?;

        SecurityEvent::new("ip_allowlist_enabled")
            .subject(session.user_id)
            .succeeded("emergency disable token minted");
        Ok(IssuedLink {
            recipient: user.email,
            secret: token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TokenError;
    use crate::store::{MemoryStore, Tenant, UserAccount};
    use chrono::Duration;

    const SECRET: &str = "emergency-secret-key-at-least-32-characters";

    struct Fixture {
        store: MemoryStore,
        clock: Arc<ManualClock>,
        tokens: EmergencyTokens,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            is_active: true,
            ip_allowlist_enabled: false,
        };
        let user = UserAccount {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            email: "admin@acme.test".to_string(),
            role: "admin".to_string(),
            password_hash: None,
            is_active: true,
        };
        let session = Session {
            user_id: user.id,
            tenant_id: tenant.id,
            role: user.role.clone(),
        };
        store.insert_tenant(tenant).await;
        store.insert_user(user).await;

        let tokens = EmergencyTokens::new(Arc::new(store.clone()), clock.clone(), SECRET);
        Fixture {
            store,
            clock,
            tokens,
            session,
        }
    }

    /// Records nothing; used to probe the action check
    struct RotateKeys;

    #[async_trait]
    impl EmergencyAction for RotateKeys {
        const ACTION: &'static str = "rotate_keys";

        async fn apply(&self, _tx: &mut dyn StoreTx, _claims: &EmergencyPayload) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn rejected_with(result: Result<(), AppError>, expected: AuthError) -> bool {
        matches!(result, Err(AppError::Auth(actual)) if actual == expected)
    }

    #[tokio::test]
    async fn test_enable_then_redeem_disables_allowlist() {
        let f = fixture().await;
        let link = f.tokens.enable_ip_allowlist(&f.session).await.unwrap();
        assert_eq!(link.recipient, "admin@acme.test");
        assert!(f.store.tenant(f.session.tenant_id).await.unwrap().ip_allowlist_enabled);

        f.tokens
            .redeem(&link.secret, &DisableIpAllowlist, &f.session, "10.0.0.1")
            .await
            .unwrap();
        assert!(!f.store.tenant(f.session.tenant_id).await.unwrap().ip_allowlist_enabled);
    }

    #[tokio::test]
    async fn test_second_redeem_is_already_used() {
        let f = fixture().await;
        let (token, jti) = f
            .tokens
            .mint(f.session.user_id, f.session.tenant_id, DISABLE_IP_ALLOWLIST)
            .await
            .unwrap();

        f.tokens
            .redeem(&token, &DisableIpAllowlist, &f.session, "10.0.0.1")
            .await
            .unwrap();
        assert!(f.store.emergency_record(jti).await.unwrap().used_at.is_some());

        let again = f
            .tokens
            .redeem(&token, &DisableIpAllowlist, &f.session, "10.0.0.1")
            .await;
        assert!(rejected_with(again, AuthError::AlreadyUsed));
    }

    #[tokio::test]
    async fn test_action_mismatch_is_checked_before_the_ledger() {
        let f = fixture().await;
        // Signed but never recorded: a ledger lookup would say InvalidOrExpired
        let (token, _) = sign(
            EmergencyPayload {
                user_id: f.session.user_id,
                tenant_id: f.session.tenant_id,
                action: DISABLE_IP_ALLOWLIST.to_string(),
                jti: Uuid::new_v4(),
            },
            SECRET,
            f.clock.now(),
        )
        .unwrap();

        let result = f.tokens.redeem(&token, &RotateKeys, &f.session, "10.0.0.1").await;
        assert!(rejected_with(result, AuthError::ActionMismatch));
    }

    #[tokio::test]
    async fn test_other_user_cannot_redeem() {
        let f = fixture().await;
        let (token, jti) = f
            .tokens
            .mint(f.session.user_id, f.session.tenant_id, DISABLE_IP_ALLOWLIST)
            .await
            .unwrap();
        let intruder = Session {
            user_id: Uuid::new_v4(),
            ..f.session.clone()
        };

        let result = f
            .tokens
            .redeem(&token, &DisableIpAllowlist, &intruder, "10.0.0.1")
            .await;
        assert!(rejected_with(result, AuthError::OwnerMismatch));
        assert!(f.store.emergency_record(jti).await.unwrap().used_at.is_none());
    }

    #[tokio::test]
    async fn test_unrecorded_token_is_invalid() {
        let f = fixture().await;
        let (token, _) = sign(
            EmergencyPayload {
                user_id: f.session.user_id,
                tenant_id: f.session.tenant_id,
                action: DISABLE_IP_ALLOWLIST.to_string(),
                jti: Uuid::new_v4(),
            },
            SECRET,
            f.clock.now(),
        )
        .unwrap();

        let result = f
            .tokens
            .redeem(&token, &DisableIpAllowlist, &f.session, "10.0.0.1")
            .await;
        assert!(rejected_with(result, AuthError::InvalidOrExpired));
    }

    #[tokio::test]
    async fn test_expired_token_is_invalid() {
        let f = fixture().await;
        let (token, _) = f
            .tokens
            .mint(f.session.user_id, f.session.tenant_id, DISABLE_IP_ALLOWLIST)
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(30));

        let result = f
            .tokens
            .redeem(&token, &DisableIpAllowlist, &f.session, "10.0.0.1")
            .await;
        assert!(rejected_with(result, AuthError::InvalidOrExpired));
    }

    #[tokio::test]
    async fn test_session_token_is_not_an_emergency_token() {
        let f = fixture().await;
        let (access, _) = crate::auth::issue_access(
            f.session.user_id,
            f.session.tenant_id,
            "admin",
            SECRET,
            f.clock.now(),
        )
        .unwrap();
        assert_eq!(
            verify::<EmergencyPayload>(&access, SECRET, f.clock.now()).unwrap_err(),
            TokenError::InvalidSignature
        );

        let result = f
            .tokens
            .redeem(&access, &DisableIpAllowlist, &f.session, "10.0.0.1")
            .await;
        assert!(rejected_with(result, AuthError::InvalidOrExpired));
    }

    #[tokio::test]
    async fn test_concurrent_redeems_have_one_winner() {
        let f = fixture().await;
        let (token, _) = f
            .tokens
            .mint(f.session.user_id, f.session.tenant_id, DISABLE_IP_ALLOWLIST)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            f.tokens.redeem(&token, &DisableIpAllowlist, &f.session, "10.0.0.1"),
            f.tokens.redeem(&token, &DisableIpAllowlist, &f.session, "10.0.0.2")
        );
        let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
        assert!(winner.is_ok());
        assert!(matches!(
            loser,
            Err(AppError::Auth(AuthError::AlreadyUsed)) | Err(AppError::Auth(AuthError::Conflict))
        ));
    }
}
