use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::flows::AcceptInvitation;
use crate::middleware::client_context;
use crate::single_use::SingleUseTokens;
use crate::validators::is_present_token;

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub token: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub user_id: Uuid,
}

/// POST /auth/invitations/accept
///
/// Sets the first password; the user logs in afterwards.
pub async fn accept_invitation(
    req: HttpRequest,
    form: web::Json<AcceptRequest>,
    tokens: web::Data<SingleUseTokens>,
) -> Result<HttpResponse, AppError> {
    let token = is_present_token(&form.token)?;
    let accept = AcceptInvitation::new(&form.password)?;
    let client = client_context(&req);

    let user_id = tokens.redeem(token, &accept, &client.origin).await?;

    Ok(HttpResponse::Ok().json(AcceptedResponse { user_id }))
}
