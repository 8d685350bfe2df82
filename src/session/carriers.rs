/// Session cookies
///
/// Both carriers are `HttpOnly`, `Secure`, `SameSite=Strict` and scoped to `/`.

use actix_web::cookie::{time::Duration, Cookie, SameSite};

use super::TokenPair;
use crate::auth::{RefreshPayload, TokenPayload};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

fn carrier(name: &'static str, value: String, max_age_seconds: i64) -> Cookie<'static> {
    Cookie::build(name, value)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(max_age_seconds))
        .finish()
}

/// Access cookie living exactly as long as the token inside it
pub fn access_cookie(token: &str, remaining_seconds: i64) -> Cookie<'static> {
    carrier(ACCESS_COOKIE, token.to_string(), remaining_seconds.max(0))
}

pub fn refresh_cookie(token: &str) -> Cookie<'static> {
    carrier(
        REFRESH_COOKIE,
        token.to_string(),
        RefreshPayload::LIFETIME_SECONDS,
    )
}

pub fn session_cookies(pair: &TokenPair) -> [Cookie<'static>; 2] {
    [
        access_cookie(&pair.access_token, pair.access_expires_in),
        refresh_cookie(&pair.refresh_token),
    ]
}

/// Expired cookies that make the browser drop both carriers
pub fn removal_cookies() -> [Cookie<'static>; 2] {
    [ACCESS_COOKIE, REFRESH_COOKIE].map(|name| {
        let mut cookie = carrier(name, String::new(), 0);
        cookie.make_removal();
        cookie
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "access".to_string(),
            access_expires_in: 900,
            refresh_token: "refresh".to_string(),
            refresh_jti: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_session_cookie_attributes() {
        for cookie in session_cookies(&pair()) {
            assert_eq!(cookie.http_only(), Some(true));
            assert_eq!(cookie.secure(), Some(true));
            assert_eq!(cookie.same_site(), Some(SameSite::Strict));
            assert_eq!(cookie.path(), Some("/"));
        }
    }

    #[test]
    fn test_cookie_lifetimes() {
        let [access, refresh] = session_cookies(&pair());
        assert_eq!(access.name(), ACCESS_COOKIE);
        assert_eq!(access.max_age(), Some(Duration::seconds(900)));
        assert_eq!(refresh.name(), REFRESH_COOKIE);
        assert_eq!(refresh.max_age(), Some(Duration::seconds(604_800)));
    }

    #[test]
    fn test_removal_cookies_are_empty_and_expired() {
        for cookie in removal_cookies() {
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(Duration::ZERO));
            assert_eq!(cookie.path(), Some("/"));
        }
    }
}
