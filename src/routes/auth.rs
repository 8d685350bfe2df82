/// Session routes
///
/// Login, explicit rotation, logout and the session-scoped identity endpoints.
/// Tokens travel only in cookies; response bodies carry the identity and the
/// access token lifetime.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clear_session_cookies;
use crate::error::{AppError, AuthError, ErrorContext};
use crate::middleware::client_context;
use crate::session::carriers::{session_cookies, REFRESH_COOKIE};
use crate::session::{Session, SessionManager, TokenPair};
use crate::validators::is_valid_email;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct RevokedResponse {
    pub revoked_sessions: u64,
}

fn session_response(session: Session, pair: &TokenPair) -> HttpResponse {
    let mut builder = HttpResponse::Ok();
    for cookie in session_cookies(pair) {
        builder.cookie(cookie);
    }
    builder.json(SessionResponse {
        user_id: session.user_id,
        tenant_id: session.tenant_id,
        role: session.role,
        expires_in: pair.access_expires_in,
    })
}

/// POST /auth/login
///
/// # Errors
/// - 400: malformed email
/// - 401: unknown email, wrong password, inactive user or tenant (one body)
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    let client = client_context(&req);

    let (session, pair) = manager.login(&email, &form.password, &client).await?;

    Ok(session_response(session, &pair))
}

/// POST /auth/refresh
///
/// Exchanges the refresh cookie for a new pair. Replays, revoked and unknown
/// records all answer 401.
pub async fn refresh(
    req: HttpRequest,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let token = req
        .cookie(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AuthError::Unauthenticated("no refresh cookie"))?;
    let client = client_context(&req);

    let (session, pair) = manager.rotate(&token, &client).await?;

    Ok(session_response(session, &pair))
}

/// POST /auth/logout
///
/// Revokes the presented refresh record when there is one and always clears
/// both cookies. Only store failures surface as errors.
pub async fn logout(
    req: HttpRequest,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    if let Some(cookie) = req.cookie(REFRESH_COOKIE) {
        let client = client_context(&req);
        match manager.logout(cookie.value(), &client).await {
            Ok(()) => {}
            // Already logged by the audit trail
            Err(e) if e.is_rejection() => {}
            Err(e) => return Err(e),
        }
    }

    let mut builder = HttpResponse::NoContent();
    clear_session_cookies(&mut builder);
    Ok(builder.finish())
}

/// GET /api/me
pub async fn current_session(session: web::ReqData<Session>) -> HttpResponse {
    HttpResponse::Ok().json(session.into_inner())
}

/// POST /api/logout-all
pub async fn logout_all(
    session: web::ReqData<Session>,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let session = session.into_inner();
    let context = ErrorContext::new("logout_all").with_user_id(session.user_id.to_string());

    let revoked_sessions = manager.revoke_all(session.user_id).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    let mut builder = HttpResponse::Ok();
    clear_session_cookies(&mut builder);
    Ok(builder.json(RevokedResponse { revoked_sessions }))
}
