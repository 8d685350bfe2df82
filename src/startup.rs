use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::clock::Clock;
use crate::configuration::{SecretSettings, TokenSettings};
use crate::email_client::EmailClient;
use crate::emergency::EmergencyTokens;
use crate::middleware::{RequestLogger, SessionMiddleware};
use crate::rate_limit::RateLimiter;
use crate::routes::{
    accept_invitation, confirm_email_change, confirm_password_reset, current_session,
    disable_ip_allowlist, enable_ip_allowlist, health_check, login, logout, logout_all, refresh,
    request_email_change, request_password_reset,
};
use crate::session::SessionManager;
use crate::single_use::SingleUseTokens;
use crate::store::Store;

/// Public URL prefix for links sent by email
pub struct ApplicationBaseUrl(pub String);

/// Everything the handlers share, built once per process
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionManager>,
    pub single_use: Arc<SingleUseTokens>,
    pub emergency: Arc<EmergencyTokens>,
}

impl Services {
    pub fn build(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        limiter: Arc<dyn RateLimiter>,
        secrets: &SecretSettings,
        ttls: TokenSettings,
    ) -> Self {
        let sessions = SessionManager::new(
            store.clone(),
            limiter,
            clock.clone(),
            secrets.session.clone(),
        );
        let single_use = SingleUseTokens::new(store.clone(), clock.clone(), ttls);
        let emergency = EmergencyTokens::new(store.clone(), clock, secrets.emergency.clone());

        Self {
            store,
            sessions: Arc::new(sessions),
            single_use: Arc::new(single_use),
            emergency: Arc::new(emergency),
        }
    }
}

pub fn run(
    listener: TcpListener,
    services: Services,
    email_client: EmailClient,
    base_url: String,
) -> Result<Server, std::io::Error> {
    let store = web::Data::from(services.store);
    let sessions = web::Data::from(services.sessions);
    let single_use = web::Data::from(services.single_use);
    let emergency = web::Data::from(services.emergency);
    let email_client = web::Data::new(email_client);
    let base_url = web::Data::new(ApplicationBaseUrl(base_url));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(store.clone())
            .app_data(sessions.clone())
            .app_data(single_use.clone())
            .app_data(emergency.clone())
            .app_data(email_client.clone())
            .app_data(base_url.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))
            .route("/auth/invitations/accept", web::post().to(accept_invitation))
            .route("/auth/password-reset", web::post().to(request_password_reset))
            .route("/auth/password-reset/confirm", web::post().to(confirm_password_reset))
            .route("/auth/email-change/confirm", web::post().to(confirm_email_change))
            // Session routes
            .service(
                web::scope("/api")
                    .wrap(SessionMiddleware::new(sessions.clone().into_inner()))
                    .route("/me", web::get().to(current_session))
                    .route("/logout-all", web::post().to(logout_all))
                    .route("/email-change", web::post().to(request_email_change))
                    .route("/tenant/ip-allowlist", web::post().to(enable_ip_allowlist))
                    .route(
                        "/emergency/ip-allowlist/disable",
                        web::post().to(disable_ip_allowlist),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
