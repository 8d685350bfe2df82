#![allow(dead_code)]

use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use uuid::Uuid;

use tenant_auth::auth::hash_password;
use tenant_auth::clock::ManualClock;
use tenant_auth::configuration::{SecretSettings, TokenSettings};
use tenant_auth::email_client::{EmailClient, SenderEmail};
use tenant_auth::rate_limit::{RateLimiter, Unlimited};
use tenant_auth::startup::{run, Services};
use tenant_auth::store::{MemoryStore, Tenant, UserAccount};

pub const PASSWORD: &str = "Correct-Horse-9";

pub struct TestApp {
    pub address: String,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub services: Services,
    pub tenant: Tenant,
    pub user: UserAccount,
    pub client: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_limiter(Arc::new(Unlimited)).await
}

pub async fn spawn_app_with_limiter(limiter: Arc<dyn RateLimiter>) -> TestApp {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::default());

    let tenant = Tenant {
        id: Uuid::new_v4(),
        name: "acme".to_string(),
        is_active: true,
        ip_allowlist_enabled: false,
    };
    let user = UserAccount {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        email: "owner@acme.test".to_string(),
        role: "owner".to_string(),
        password_hash: Some(hash_password(PASSWORD).expect("Failed to hash password")),
        is_active: true,
    };
    store.insert_tenant(tenant.clone()).await;
    store.insert_user(user.clone()).await;

    let secrets = SecretSettings {
        session: "integration-session-secret-0123456789abcdef".to_string(),
        emergency: "integration-emergency-secret-0123456789abcdef".to_string(),
    };
    let services = Services::build(
        Arc::new(store.clone()),
        clock.clone(),
        limiter,
        &secrets,
        TokenSettings::default(),
    );

    // Nothing listens here; delivery failures are only logged
    let email_client = EmailClient::new(
        "http://127.0.0.1:9".to_string(),
        SenderEmail::parse("noreply@acme.test").expect("Invalid sender"),
        std::time::Duration::from_millis(200),
    );

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let server = run(
        listener,
        services.clone(),
        email_client,
        address.clone(),
    )
    .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        store,
        clock,
        services,
        tenant,
        user,
        client: reqwest::Client::new(),
    }
}

/// Cookies set by a response; an empty value means the cookie was removed
pub fn set_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// A client-side cookie jar holding the two session carriers
#[derive(Clone, Debug, Default)]
pub struct Jar {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl Jar {
    pub fn absorb(&mut self, headers: &HeaderMap) {
        let cookies = set_cookies(headers);
        if let Some(value) = cookies.get("access_token") {
            self.access = Some(value.clone()).filter(|v| !v.is_empty());
        }
        if let Some(value) = cookies.get("refresh_token") {
            self.refresh = Some(value.clone()).filter(|v| !v.is_empty());
        }
    }

    pub fn header(&self) -> String {
        let mut parts = Vec::new();
        if let Some(access) = &self.access {
            parts.push(format!("access_token={}", access));
        }
        if let Some(refresh) = &self.refresh {
            parts.push(format!("refresh_token={}", refresh));
        }
        parts.join("; ")
    }
}

impl TestApp {
    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(&format!("{}/auth/login", &self.address))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Log the seeded user in and return the carriers
    pub async fn logged_in(&self) -> Jar {
        let response = self.login(&self.user.email, PASSWORD).await;
        assert_eq!(200, response.status().as_u16());
        let mut jar = Jar::default();
        jar.absorb(response.headers());
        jar
    }

    pub async fn get_with(&self, path: &str, jar: &Jar) -> reqwest::Response {
        self.client
            .get(&format!("{}{}", &self.address, path))
            .header(COOKIE, jar.header())
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_with(
        &self,
        path: &str,
        jar: &Jar,
        body: serde_json::Value,
    ) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", &self.address, path))
            .header(COOKIE, jar.header())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", &self.address, path))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}
