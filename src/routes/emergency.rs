use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::deliver_link;
use crate::email_client::EmailClient;
use crate::emergency::{DisableIpAllowlist, EmergencyTokens};
use crate::error::AppError;
use crate::middleware::client_context;
use crate::session::Session;
use crate::startup::ApplicationBaseUrl;
use crate::validators::is_present_token;

pub const IP_ALLOWLIST_DISABLE_PATH: &str = "/api/emergency/ip-allowlist/disable";

#[derive(Deserialize)]
pub struct EmergencyRedemption {
    pub token: String,
}

/// The mailed link carries the token in its query string
#[derive(Deserialize)]
pub struct EmergencyLink {
    pub token: Option<String>,
}

/// Link that redeems an emergency token against the disable route
pub fn ip_allowlist_disable_url(base_url: &str, token: &str) -> String {
    format!(
        "{}{}?token={}",
        base_url.trim_end_matches('/'),
        IP_ALLOWLIST_DISABLE_PATH,
        token
    )
}

/// POST /api/tenant/ip-allowlist
///
/// Enables the allow-list and mails the caller a link that can disable it
/// again should it lock them out.
pub async fn enable_ip_allowlist(
    session: web::ReqData<Session>,
    tokens: web::Data<EmergencyTokens>,
    email_client: web::Data<EmailClient>,
    base_url: web::Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, AppError> {
    let session = session.into_inner();
    let link = tokens.enable_ip_allowlist(&session).await?;

    let url = ip_allowlist_disable_url(&base_url.0, &link.secret);
    deliver_link(
        &email_client,
        &link,
        &url,
        "IP allow-list enabled",
        "Your tenant now only accepts listed addresses. If this locks you out, use the link below within 30 minutes to disable it.",
    )
    .await;

    Ok(HttpResponse::Accepted().finish())
}

/// POST /api/emergency/ip-allowlist/disable
///
/// Takes the token from a JSON body or, when following the mailed link, from
/// the query string.
pub async fn disable_ip_allowlist(
    req: HttpRequest,
    session: web::ReqData<Session>,
    link: web::Query<EmergencyLink>,
    form: Option<web::Json<EmergencyRedemption>>,
    tokens: web::Data<EmergencyTokens>,
) -> Result<HttpResponse, AppError> {
    let token = form
        .map(|form| form.into_inner().token)
        .or_else(|| link.into_inner().token)
        .unwrap_or_default();
    let token = is_present_token(&token)?;
    let client = client_context(&req);

    tokens
        .redeem(token, &DisableIpAllowlist, &session, &client.origin)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "ip_allowlist_enabled": false })))
}
