use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AuthError, StoreError};
use crate::session::Session;
use crate::single_use::{IssuedLink, Redemption, RedemptionContext, SingleUseTokens};
use crate::store::{Store, StoreTx, TokenPurpose};
use crate::validators::is_valid_email;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailChangePayload {
    pub new_email: String,
}

/// Start an email change for the session's user
///
/// The link goes to the new address, proving the user controls it.
pub async fn request_email_change(
    store: &dyn Store,
    tokens: &SingleUseTokens,
    session: &Session,
    new_email: &str,
) -> Result<IssuedLink, AppError> {
    let new_email = is_valid_email(new_email)?;

    let mut tx = store.begin().await?;
    let existing = tx.fetch_user_by_email(&new_email).await?;
    drop(tx);

    if let Some(other) = existing {
        if other.id != session.user_id {
            return Err(StoreError::Conflict("email already registered".to_string()).into());
        }
    }

    let payload = EmailChangePayload {
        new_email: new_email.clone(),
    };
    let secret = tokens
        .issue(session.user_id, TokenPurpose::EmailChange, &payload)
        .await?;

    Ok(IssuedLink {
        recipient: new_email,
        secret,
    })
}

/// Applies the new address and ends every session of the user
pub struct ConfirmEmailChange;

#[async_trait]
impl Redemption for ConfirmEmailChange {
    const PURPOSE: TokenPurpose = TokenPurpose::EmailChange;
    type Payload = EmailChangePayload;
    /// The address now on the account
    type Output = String;

    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RedemptionContext,
        payload: EmailChangePayload,
    ) -> Result<String, AppError> {
        if !tx.set_email(ctx.owner, &payload.new_email).await? {
            return Err(AuthError::InvalidOrExpired.into());
        }
        let revoked = tx.revoke_user_refresh_records(ctx.owner, ctx.now).await?;

        tracing::info!(user_id = %ctx.owner, revoked_sessions = revoked, "Email changed");
        Ok(payload.new_email)
    }
}
