use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::hash_password;
use crate::error::{AppError, AuthError};
use crate::single_use::{IssuedLink, Redemption, RedemptionContext, SingleUseTokens};
use crate::store::{Store, StoreTx, TokenPurpose};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetPayload {
    /// Address the link was sent to
    pub email: String,
}

/// Start a reset for `email`
///
/// `None` when there is no active account for the address; callers report
/// success either way.
pub async fn request_password_reset(
    store: &dyn Store,
    tokens: &SingleUseTokens,
    email: &str,
) -> Result<Option<IssuedLink>, AppError> {
    let mut tx = store.begin().await?;
    let user = tx.fetch_user_by_email(email).await?;
    drop(tx);

    let user = match user {
        Some(user) if user.is_active => user,
        _ => {
            tracing::info!("Password reset requested for unknown or inactive account");
            return Ok(None);
        }
    };

    let payload = PasswordResetPayload {
        email: user.email.clone(),
    };
    let secret = tokens
        .issue(user.id, TokenPurpose::PasswordReset, &payload)
        .await?;

    Ok(Some(IssuedLink {
        recipient: user.email,
        secret,
    }))
}

/// Rewrites the password and ends every session of the user
pub struct ResetPassword {
    password_hash: String,
}

impl ResetPassword {
    pub fn new(password: &str) -> Result<Self, AppError> {
        Ok(Self {
            password_hash: hash_password(password)?,
        })
    }
}

#[async_trait]
impl Redemption for ResetPassword {
    const PURPOSE: TokenPurpose = TokenPurpose::PasswordReset;
    type Payload = PasswordResetPayload;
    /// Number of sessions ended
    type Output = u64;

    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RedemptionContext,
        payload: PasswordResetPayload,
    ) -> Result<u64, AppError> {
        let user = tx
            .fetch_user(ctx.owner)
            .await?
            .ok_or(AuthError::InvalidOrExpired)?;
        // A link mailed to a previous address is dead
        if !user.email.eq_ignore_ascii_case(&payload.email) {
            return Err(AuthError::InvalidOrExpired.into());
        }

        tx.set_password_hash(user.id, &self.password_hash).await?;
        let revoked = tx.revoke_user_refresh_records(user.id, ctx.now).await?;

        tracing::info!(user_id = %user.id, revoked_sessions = revoked, "Password reset");
        Ok(revoked)
    }
}
