use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::{clear_session_cookies, deliver_link};
use crate::email_client::EmailClient;
use crate::error::AppError;
use crate::flows::{self, ResetPassword};
use crate::middleware::client_context;
use super::auth::RevokedResponse;
use crate::single_use::SingleUseTokens;
use crate::startup::ApplicationBaseUrl;
use crate::store::Store;
use crate::validators::{is_present_token, is_valid_email};

#[derive(Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetConfirmation {
    pub token: String,
    pub password: String,
}

/// POST /auth/password-reset
///
/// Answers 202 whether or not the address has an account.
pub async fn request_password_reset(
    form: web::Json<ResetRequest>,
    store: web::Data<dyn Store>,
    tokens: web::Data<SingleUseTokens>,
    email_client: web::Data<EmailClient>,
    base_url: web::Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;

    if let Some(link) = flows::request_password_reset(store.get_ref(), &tokens, &email).await? {
        let url = format!(
            "{}/auth/password-reset/confirm?token={}",
            base_url.0, link.secret
        );
        deliver_link(
            &email_client,
            &link,
            &url,
            "Reset your password",
            "Use the link below to choose a new password. It expires in 30 minutes.",
        )
        .await;
    }

    Ok(HttpResponse::Accepted().finish())
}

/// POST /auth/password-reset/confirm
///
/// Ends every session of the user, including the caller's.
pub async fn confirm_password_reset(
    req: HttpRequest,
    form: web::Json<ResetConfirmation>,
    tokens: web::Data<SingleUseTokens>,
) -> Result<HttpResponse, AppError> {
    let token = is_present_token(&form.token)?;
    let reset = ResetPassword::new(&form.password)?;
    let client = client_context(&req);

    let revoked_sessions = tokens.redeem(token, &reset, &client.origin).await?;

    let mut builder = HttpResponse::Ok();
    clear_session_cookies(&mut builder);
    Ok(builder.json(RevokedResponse { revoked_sessions }))
}
