mod common;

use chrono::Duration;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{set_cookies, spawn_app, Jar, TestApp, PASSWORD};
use tenant_auth::flows;
use tenant_auth::session::Session;
use tenant_auth::store::UserAccount;

async fn reset_secret(app: &TestApp) -> String {
    flows::request_password_reset(
        app.services.store.as_ref(),
        &app.services.single_use,
        &app.user.email,
    )
    .await
    .expect("Failed to request reset")
    .expect("No reset link for the seeded user")
    .secret
}

fn session_of(app: &TestApp) -> Session {
    Session {
        user_id: app.user.id,
        tenant_id: app.tenant.id,
        role: app.user.role.clone(),
    }
}

// --- Invitations ---

#[tokio::test]
async fn accepting_invitation_activates_user_who_can_then_log_in() {
    let app = spawn_app().await;
    let invitee = UserAccount {
        id: Uuid::new_v4(),
        tenant_id: app.tenant.id,
        email: "invitee@acme.test".to_string(),
        role: "member".to_string(),
        password_hash: None,
        is_active: false,
    };
    app.store.insert_user(invitee.clone()).await;
    let link = flows::invite(&app.services.single_use, &invitee)
        .await
        .expect("Failed to invite");

    let response = app
        .post_json(
            "/auth/invitations/accept",
            json!({ "token": link.secret, "password": "Fresh-Start-42" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user_id"], invitee.id.to_string());

    let login = app.login("invitee@acme.test", "Fresh-Start-42").await;
    assert_eq!(200, login.status().as_u16());

    let again = app
        .post_json(
            "/auth/invitations/accept",
            json!({ "token": link.secret, "password": "Fresh-Start-42" }),
        )
        .await;
    assert_eq!(400, again.status().as_u16());
    let body: Value = again.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_OR_EXPIRED");
}

#[tokio::test]
async fn accepting_invitation_with_weak_password_keeps_token_usable() {
    let app = spawn_app().await;
    let invitee = UserAccount {
        id: Uuid::new_v4(),
        tenant_id: app.tenant.id,
        email: "invitee@acme.test".to_string(),
        role: "member".to_string(),
        password_hash: None,
        is_active: false,
    };
    app.store.insert_user(invitee.clone()).await;
    let link = flows::invite(&app.services.single_use, &invitee).await.unwrap();

    let weak = app
        .post_json(
            "/auth/invitations/accept",
            json!({ "token": link.secret, "password": "weak" }),
        )
        .await;
    assert_eq!(400, weak.status().as_u16());

    let strong = app
        .post_json(
            "/auth/invitations/accept",
            json!({ "token": link.secret, "password": "Fresh-Start-42" }),
        )
        .await;
    assert_eq!(200, strong.status().as_u16());
}

// --- Password reset ---

#[tokio::test]
async fn password_reset_request_is_accepted_for_any_address() {
    let app = spawn_app().await;

    let known = app
        .post_json("/auth/password-reset", json!({ "email": app.user.email }))
        .await;
    let unknown = app
        .post_json("/auth/password-reset", json!({ "email": "ghost@acme.test" }))
        .await;

    assert_eq!(202, known.status().as_u16());
    assert_eq!(202, unknown.status().as_u16());
    assert_eq!(app.store.single_use_tokens_for(app.user.id).await.len(), 1);
}

#[tokio::test]
async fn password_reset_request_rejects_malformed_email() {
    let app = spawn_app().await;

    let response = app
        .post_json("/auth/password-reset", json!({ "email": "nope" }))
        .await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn confirming_reset_changes_password_and_ends_sessions() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;
    let secret = reset_secret(&app).await;

    let response = app
        .post_json(
            "/auth/password-reset/confirm",
            json!({ "token": secret, "password": "Brand-New-Pass-7" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let cookies = set_cookies(response.headers());
    assert_eq!(cookies.get("refresh_token").map(String::as_str), Some(""));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["revoked_sessions"], 1);

    assert_eq!(401, app.login(&app.user.email, PASSWORD).await.status().as_u16());
    assert_eq!(
        200,
        app.login(&app.user.email, "Brand-New-Pass-7").await.status().as_u16()
    );

    let refresh_only = Jar {
        access: None,
        refresh: jar.refresh,
    };
    assert_eq!(401, app.get_with("/api/me", &refresh_only).await.status().as_u16());
}

#[tokio::test]
async fn expired_reset_link_is_rejected() {
    let app = spawn_app().await;
    let secret = reset_secret(&app).await;

    app.clock.advance(Duration::minutes(31));
    let response = app
        .post_json(
            "/auth/password-reset/confirm",
            json!({ "token": secret, "password": "Brand-New-Pass-7" }),
        )
        .await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn reset_secret_cannot_confirm_email_change() {
    let app = spawn_app().await;
    let secret = reset_secret(&app).await;

    let response = app
        .post_json("/auth/email-change/confirm", json!({ "token": secret }))
        .await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn empty_token_is_a_validation_error() {
    let app = spawn_app().await;

    let response = app
        .post_json(
            "/auth/password-reset/confirm",
            json!({ "token": "  ", "password": "Brand-New-Pass-7" }),
        )
        .await;

    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

// --- Email change ---

#[tokio::test]
async fn email_change_request_requires_session() {
    let app = spawn_app().await;

    let response = app
        .post_with(
            "/api/email-change",
            &Jar::default(),
            json!({ "new_email": "new@acme.test" }),
        )
        .await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn email_change_request_is_accepted() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;

    let response = app
        .post_with("/api/email-change", &jar, json!({ "new_email": "new@acme.test" }))
        .await;

    assert_eq!(202, response.status().as_u16());
    assert_eq!(app.store.single_use_tokens_for(app.user.id).await.len(), 1);
}

#[tokio::test]
async fn email_change_to_taken_address_is_409() {
    let app = spawn_app().await;
    app.store
        .insert_user(UserAccount {
            id: Uuid::new_v4(),
            tenant_id: app.tenant.id,
            email: "taken@acme.test".to_string(),
            role: "member".to_string(),
            password_hash: None,
            is_active: true,
        })
        .await;
    let jar = app.logged_in().await;

    let response = app
        .post_with("/api/email-change", &jar, json!({ "new_email": "taken@acme.test" }))
        .await;

    assert_eq!(409, response.status().as_u16());
}

#[tokio::test]
async fn confirming_email_change_switches_login_address() {
    let app = spawn_app().await;
    let link = flows::request_email_change(
        app.services.store.as_ref(),
        &app.services.single_use,
        &session_of(&app),
        "new@acme.test",
    )
    .await
    .expect("Failed to request email change");
    assert_eq!(link.recipient, "new@acme.test");

    let response = app
        .post_json("/auth/email-change/confirm", json!({ "token": link.secret }))
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["email"], "new@acme.test");

    assert_eq!(401, app.login(&app.user.email, PASSWORD).await.status().as_u16());
    assert_eq!(200, app.login("new@acme.test", PASSWORD).await.status().as_u16());
}

#[tokio::test]
async fn confirming_email_change_ends_existing_sessions() {
    let app = spawn_app().await;
    let jar = app.logged_in().await;
    let link = flows::request_email_change(
        app.services.store.as_ref(),
        &app.services.single_use,
        &session_of(&app),
        "new@acme.test",
    )
    .await
    .expect("Failed to request email change");

    let response = app
        .post_json("/auth/email-change/confirm", json!({ "token": link.secret }))
        .await;
    assert_eq!(200, response.status().as_u16());
    let cookies = set_cookies(response.headers());
    assert_eq!(cookies.get("refresh_token").map(String::as_str), Some(""));

    for record in app.store.refresh_records_for(app.user.id).await {
        assert!(record.revoked_at.is_some());
    }
    let refresh_only = Jar {
        access: None,
        refresh: jar.refresh,
    };
    assert_eq!(
        401,
        app.post_with("/auth/refresh", &refresh_only, json!({}))
            .await
            .status()
            .as_u16()
    );
}
