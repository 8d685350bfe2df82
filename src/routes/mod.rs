mod auth;
mod email_change;
mod emergency;
mod health_check;
mod invitation;
mod password_reset;

pub use auth::{current_session, login, logout, logout_all, refresh};
pub use email_change::{confirm_email_change, request_email_change};
pub use emergency::{
    disable_ip_allowlist, enable_ip_allowlist, ip_allowlist_disable_url, IP_ALLOWLIST_DISABLE_PATH,
};
pub use health_check::health_check;
pub use invitation::accept_invitation;
pub use password_reset::{confirm_password_reset, request_password_reset};

use actix_web::HttpResponseBuilder;

use crate::email_client::EmailClient;
use crate::session::carriers::removal_cookies;
use crate::single_use::IssuedLink;

/// Mail a one-time link; delivery failures are logged, never returned
async fn deliver_link(
    email_client: &EmailClient,
    link: &IssuedLink,
    url: &str,
    subject: &str,
    intro: &str,
) {
    if let Err(e) = email_client
        .send_link(&link.recipient, subject, intro, url)
        .await
    {
        tracing::error!(error = %e, subject = subject, "Failed to deliver one-time link");
    }
}

fn clear_session_cookies(builder: &mut HttpResponseBuilder) {
    for cookie in removal_cookies() {
        builder.cookie(cookie);
    }
}
