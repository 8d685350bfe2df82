/// Session middleware
///
/// Resolves the caller from the `access_token` / `refresh_token` cookies,
/// rotating the pair when the access token is missing or expired, and puts
/// the resulting `Session` into the request extensions for handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, StatusCode},
    Error, HttpMessage, HttpRequest, ResponseError,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::session::carriers::{removal_cookies, session_cookies, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::session::{ClientContext, SessionManager};

/// Device and peer address of a request
///
/// The peer address is taken from the socket, not from forwarding headers.
pub fn client_context(req: &HttpRequest) -> ClientContext {
    let device = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown");
    let origin = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    ClientContext::new(device, origin)
}

pub struct SessionMiddleware {
    manager: Arc<SessionManager>,
}

impl SessionMiddleware {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SessionMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(SessionMiddlewareService {
            service: Rc::new(service),
            manager: self.manager.clone(),
        }))
    }
}

pub struct SessionMiddlewareService<S> {
    service: Rc<S>,
    manager: Arc<SessionManager>,
}

impl<S, B> Service<ServiceRequest> for SessionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let access = req.cookie(ACCESS_COOKIE).map(|c| c.value().to_string());
        let refresh = req.cookie(REFRESH_COOKIE).map(|c| c.value().to_string());
        let client = client_context(req.request());

        let service = self.service.clone();
        let manager = self.manager.clone();

        Box::pin(async move {
            let outcome = manager
                .authenticate(access.as_deref(), refresh.as_deref(), &client)
                .await;

            match outcome {
                Ok(outcome) => {
                    let (session, rotated) = outcome.into_parts();
                    tracing::debug!(user_id = %session.user_id, rotated = rotated.is_some(), "Session resolved");
                    req.extensions_mut().insert(session);

                    let mut res = service.call(req).await?;
                    // A handler that already set or cleared the carriers wins
                    let handled = res
                        .response()
                        .cookies()
                        .any(|c| c.name() == ACCESS_COOKIE || c.name() == REFRESH_COOKIE);
                    if let Some(pair) = rotated.filter(|_| !handled) {
                        for cookie in session_cookies(&pair) {
                            res.response_mut().add_cookie(&cookie)?;
                        }
                    }
                    Ok(res)
                }
                Err(e) => {
                    let mut response = e.error_response();
                    // Dead carriers are dropped so the client stops replaying them
                    if response.status() == StatusCode::UNAUTHORIZED {
                        for cookie in removal_cookies() {
                            if let Err(err) = response.add_cookie(&cookie) {
                                tracing::warn!(error = %err, "Failed to attach removal cookie");
                            }
                        }
                    }
                    Err(actix_web::error::InternalError::from_response(e, response).into())
                }
            }
        })
    }
}
