//! Single-use opaque tokens
//!
//! `issue` hands out a random secret once and keeps only its hash. `redeem`
//! consumes the token with a conditional update and runs the caller's side
//! effect in the same transaction, so the effect happens at most once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::SecurityEvent;
use crate::auth::{generate_secret, hash_secret};
use crate::clock::Clock;
use crate::configuration::TokenSettings;
use crate::error::{AppError, AuthError};
use crate::store::{SingleUseToken, Store, StoreTx, TokenPurpose, TokenState};

/// A freshly issued secret and the address it should be mailed to
#[derive(Debug, Clone)]
pub struct IssuedLink {
    pub recipient: String,
    pub secret: String,
}

/// What a redemption knows about the consumed token
#[derive(Debug, Clone, Copy)]
pub struct RedemptionContext {
    pub owner: Uuid,
    pub now: DateTime<Utc>,
}

/// Side effect performed when a token of `PURPOSE` is redeemed
#[async_trait]
pub trait Redemption: Send + Sync {
    const PURPOSE: TokenPurpose;
    type Payload: DeserializeOwned + Send;
    type Output: Send;

    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RedemptionContext,
        payload: Self::Payload,
    ) -> Result<Self::Output, AppError>;
}

pub struct SingleUseTokens {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ttls: TokenSettings,
}

impl SingleUseTokens {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, ttls: TokenSettings) -> Self {
        Self { store, clock, ttls }
    }

    /// Issue a token for `owner`, replacing any unredeemed token of the same
    /// purpose
    ///
    /// Returns the plaintext secret; it is not recoverable afterwards.
    pub async fn issue<T: Serialize>(
        &self,
        owner: Uuid,
        purpose: TokenPurpose,
        payload: &T,
    ) -> Result<String, AppError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| AppError::Internal(format!("Failed to encode token payload: {}", e)))?;
        let now = self.clock.now();
        let secret = generate_secret();
        let token = SingleUseToken {
            token_hash: hash_secret(&secret),
            user_id: owner,
            purpose,
            payload,
            expires_at: now + self.ttls.ttl(purpose),
            used_at: None,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        let replaced = tx.delete_outstanding_tokens(owner, purpose).await?;
        tx.insert_single_use_token(&token).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %owner,
            purpose = %purpose,
            replaced = replaced,
            expires_at = %token.expires_at,
            "Single-use token issued"
        );
        Ok(secret)
    }

    /// Consume a token and apply `redemption`
    ///
    /// Unknown, foreign-purpose, used and expired tokens are indistinguishable
    /// to the caller: all are `InvalidOrExpired`.
    pub async fn redeem<R: Redemption>(
        &self,
        secret: &str,
        redemption: &R,
        origin: &str,
    ) -> Result<R::Output, AppError> {
        let event = SecurityEvent::new(R::PURPOSE.as_str()).origin(origin);
        let now = self.clock.now();
        let token_hash = hash_secret(secret);

        let mut tx = self.store.begin().await?;
        let token = tx
            .fetch_single_use_token(&token_hash)
            .await?
            .ok_or_else(|| event.reject(AuthError::InvalidOrExpired))?;
        let event = event.subject(token.user_id);

        if token.purpose != R::PURPOSE {
            tracing::debug!(found = %token.purpose, "Single-use token purpose mismatch");
            return Err(event.reject(AuthError::InvalidOrExpired));
        }
        if token.state(now) != TokenState::Issued {
            return Err(event.reject(AuthError::InvalidOrExpired));
        }
        if !tx.mark_single_use_token_used(&token_hash, now).await? {
            return Err(event.reject(AuthError::InvalidOrExpired));
        }

        let payload: R::Payload = serde_json::from_value(token.payload).map_err(|e| {
            AppError::Internal(format!("Stored {} payload is unreadable: {}", R::PURPOSE, e))
        })?;
        let ctx = RedemptionContext {
            owner: token.user_id,
            now,
        };
        let output = redemption
            .apply(&mut *tx, &ctx, payload)
            .await
            .map_err(|e| event.reject(e))?;
        tx.commit().await?;

        event.succeeded("single-use token redeemed");
        Ok(output)
    }
}
