mod common;

use chrono::Duration;
use serde_json::{json, Value};
use uuid::Uuid;

use reqwest::header::COOKIE;

use common::{spawn_app, Jar, TestApp};
use tenant_auth::emergency::DISABLE_IP_ALLOWLIST;
use tenant_auth::routes::ip_allowlist_disable_url;

async fn mint(app: &TestApp, action: &str) -> String {
    let (token, _) = app
        .services
        .emergency
        .mint(app.user.id, app.tenant.id, action)
        .await
        .expect("Failed to mint emergency token");
    token
}

#[tokio::test]
async fn enabling_allowlist_requires_session() {
    let app = spawn_app().await;

    let response = app
        .post_with("/api/tenant/ip-allowlist", &Jar::default(), json!({}))
        .await;

    assert_eq!(401, response.status().as_u16());
    assert!(!app.store.tenant(app.tenant.id).await.unwrap().ip_allowlist_enabled);
}

#[tokio::test]
async fn enabling_allowlist_sets_flag() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;

    let response = app
        .post_with("/api/tenant/ip-allowlist", &jar, json!({}))
        .await;

    assert_eq!(202, response.status().as_u16());
    assert!(app.store.tenant(app.tenant.id).await.unwrap().ip_allowlist_enabled);
}

#[tokio::test]
async fn emergency_token_disables_allowlist_once() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;
    let enable = app
        .post_with("/api/tenant/ip-allowlist", &jar, json!({}))
        .await;
    assert_eq!(202, enable.status().as_u16());
    let token = mint(&app, DISABLE_IP_ALLOWLIST).await;

    let response = app
        .post_with(
            "/api/emergency/ip-allowlist/disable",
            &jar,
            json!({ "token": token }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ip_allowlist_enabled"], false);
    assert!(!app.store.tenant(app.tenant.id).await.unwrap().ip_allowlist_enabled);

    let again = app
        .post_with(
            "/api/emergency/ip-allowlist/disable",
            &jar,
            json!({ "token": token }),
        )
        .await;
    assert_eq!(409, again.status().as_u16());
}

#[tokio::test]
async fn emergency_token_for_other_action_is_forbidden() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;
    let token = mint(&app, "rotate_api_keys").await;

    let response = app
        .post_with(
            "/api/emergency/ip-allowlist/disable",
            &jar,
            json!({ "token": token }),
        )
        .await;

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn emergency_token_of_another_user_is_forbidden() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;
    let (token, _) = app
        .services
        .emergency
        .mint(Uuid::new_v4(), app.tenant.id, DISABLE_IP_ALLOWLIST)
        .await
        .unwrap();

    let response = app
        .post_with(
            "/api/emergency/ip-allowlist/disable",
            &jar,
            json!({ "token": token }),
        )
        .await;

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn expired_emergency_token_is_rejected() {
    let app = spawn_app().await;
    let token = mint(&app, DISABLE_IP_ALLOWLIST).await;

    app.clock.advance(Duration::minutes(31));
    // Log in after the jump so the session itself is fresh
    let jar = app.logged_in().await;
    let response = app
        .post_with(
            "/api/emergency/ip-allowlist/disable",
            &jar,
            json!({ "token": token }),
        )
        .await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn session_access_token_is_not_an_emergency_token() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;

    let response = app
        .post_with(
            "/api/emergency/ip-allowlist/disable",
            &jar,
            json!({ "token": jar.access.clone().unwrap() }),
        )
        .await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn mailed_link_disables_allowlist() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;
    let enable = app
        .post_with("/api/tenant/ip-allowlist", &jar, json!({}))
        .await;
    assert_eq!(202, enable.status().as_u16());
    let token = mint(&app, DISABLE_IP_ALLOWLIST).await;

    let url = ip_allowlist_disable_url(&app.address, &token);
    let response = app
        .client
        .post(&url)
        .header(COOKIE, jar.header())
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    assert!(!app.store.tenant(app.tenant.id).await.unwrap().ip_allowlist_enabled);
}

#[tokio::test]
async fn disable_without_token_is_a_validation_error() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;

    let response = app
        .client
        .post(&format!("{}/api/emergency/ip-allowlist/disable", &app.address))
        .header(COOKIE, jar.header())
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());
}
