use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::hash_password;
use crate::error::{AppError, AuthError};
use crate::single_use::{IssuedLink, Redemption, RedemptionContext, SingleUseTokens};
use crate::store::{StoreTx, TokenPurpose, UserAccount};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationPayload {
    pub tenant_id: Uuid,
    pub email: String,
    pub role: String,
}

/// Issue an invitation for a pending user
pub async fn invite(tokens: &SingleUseTokens, user: &UserAccount) -> Result<IssuedLink, AppError> {
    let payload = InvitationPayload {
        tenant_id: user.tenant_id,
        email: user.email.clone(),
        role: user.role.clone(),
    };
    let secret = tokens
        .issue(user.id, TokenPurpose::Invitation, &payload)
        .await?;

    Ok(IssuedLink {
        recipient: user.email.clone(),
        secret,
    })
}

/// Sets the first password and activates the invited user
pub struct AcceptInvitation {
    password_hash: String,
}

impl AcceptInvitation {
    /// Hashes up front so a weak password never consumes the invitation
    pub fn new(password: &str) -> Result<Self, AppError> {
        Ok(Self {
            password_hash: hash_password(password)?,
        })
    }
}

#[async_trait]
impl Redemption for AcceptInvitation {
    const PURPOSE: TokenPurpose = TokenPurpose::Invitation;
    type Payload = InvitationPayload;
    type Output = Uuid;

    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RedemptionContext,
        payload: InvitationPayload,
    ) -> Result<Uuid, AppError> {
        let user = tx
            .fetch_user(ctx.owner)
            .await?
            .ok_or(AuthError::InvalidOrExpired)?;
        if user.tenant_id != payload.tenant_id {
            return Err(AuthError::OwnerMismatch.into());
        }
        tx.fetch_tenant(payload.tenant_id)
            .await?
            .filter(|tenant| tenant.is_active)
            .ok_or(AuthError::InvalidOrExpired)?;

        tx.set_password_hash(user.id, &self.password_hash).await?;
        tx.activate_user(user.id).await?;

        tracing::info!(user_id = %user.id, tenant_id = %payload.tenant_id, role = %payload.role, "Invitation accepted");
        Ok(user.id)
    }
}
