use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use super::{clear_session_cookies, deliver_link};
use crate::email_client::EmailClient;
use crate::error::AppError;
use crate::flows::{self, ConfirmEmailChange};
use crate::middleware::client_context;
use crate::session::Session;
use crate::single_use::SingleUseTokens;
use crate::startup::ApplicationBaseUrl;
use crate::store::Store;
use crate::validators::is_present_token;

#[derive(Deserialize)]
pub struct EmailChangeRequest {
    pub new_email: String,
}

#[derive(Deserialize)]
pub struct EmailChangeConfirmation {
    pub token: String,
}

#[derive(Serialize)]
pub struct EmailChangedResponse {
    pub email: String,
}

/// POST /api/email-change
pub async fn request_email_change(
    session: web::ReqData<Session>,
    form: web::Json<EmailChangeRequest>,
    store: web::Data<dyn Store>,
    tokens: web::Data<SingleUseTokens>,
    email_client: web::Data<EmailClient>,
    base_url: web::Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, AppError> {
    let session = session.into_inner();
    let link =
        flows::request_email_change(store.get_ref(), &tokens, &session, &form.new_email).await?;

    let url = format!(
        "{}/auth/email-change/confirm?token={}",
        base_url.0, link.secret
    );
    deliver_link(
        &email_client,
        &link,
        &url,
        "Confirm your new email address",
        "Use the link below to confirm this address for your account. It expires in 30 minutes.",
    )
    .await;

    Ok(HttpResponse::Accepted().finish())
}

/// POST /auth/email-change/confirm
///
/// Ends every session of the user, including the caller's.
pub async fn confirm_email_change(
    req: HttpRequest,
    form: web::Json<EmailChangeConfirmation>,
    tokens: web::Data<SingleUseTokens>,
) -> Result<HttpResponse, AppError> {
    let token = is_present_token(&form.token)?;
    let client = client_context(&req);

    let email = tokens
        .redeem(token, &ConfirmEmailChange, &client.origin)
        .await?;

    let mut builder = HttpResponse::Ok();
    clear_session_cookies(&mut builder);
    Ok(builder.json(EmailChangedResponse { email }))
}
