//! Sign-in, session cookie and role/permission enforcement

mod helpers;

use axum::http::{header, StatusCode};
use helpers::*;
use serde_json::json;

fn location(response: &axum::http::Response<axum::body::Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// =============================================================================
// Public endpoints
// =============================================================================

#[tokio::test]
async fn test_health_needs_no_session() {
    let app = setup().await;

    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "crewledger");

    let response = app.get("/api/buildinfo", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["git_hash"].is_string());
}

#[tokio::test]
async fn test_protected_routes_redirect_to_login() {
    let app = setup().await;

    for uri in ["/", "/dashboard", "/api/dashboard/summary", "/export/quickbooks"] {
        let response = app.get(uri, None).await;
        assert_eq!(response.status(), StatusCode::FOUND, "{}", uri);
        assert!(location(&response).starts_with("/auth/login?next="), "{}", uri);
    }

    let response = app.get("/ledger?status=flagged", None).await;
    assert_eq!(location(&response), "/auth/login?next=%2Fledger%3Fstatus%3Dflagged");
}

#[tokio::test]
async fn test_unknown_session_token_redirects() {
    let app = setup().await;
    let response = app.get("/dashboard", Some("not-a-real-token")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

// =============================================================================
// Google sign-in
// =============================================================================

async fn start_login(app: &TestApp, next: &str) -> String {
    let response = app.get(&format!("/auth/google?next={}", next), None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let url = url::Url::parse(&location(&response)).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("authorize URL carries state")
}

#[tokio::test]
async fn test_oauth_callback_issues_session() {
    let app = setup().await;
    sqlx::query("INSERT INTO authorized_users (email, system_role) VALUES ('owner@example.com', 'super_admin')")
        .execute(app.pool())
        .await
        .unwrap();

    let state = start_login(&app, "%2Fledger").await;
    let response = app
        .get(&format!("/auth/callback?code=ok&state={}", state), None)
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/ledger");

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.contains("HttpOnly"));
    let token = cookie
        .trim_start_matches("crewledger_session=")
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let response = app.get("/api/dashboard/summary", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let last_login: Option<String> =
        sqlx::query_scalar("SELECT last_login FROM authorized_users WHERE email = 'owner@example.com'")
            .fetch_one(app.pool())
            .await
            .unwrap();
    assert!(last_login.is_some());

    // The state is single-use
    let response = app
        .get(&format!("/auth/callback?code=ok&state={}", state), None)
        .await;
    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_unauthorized_email_is_denied() {
    let app = setup().await;

    let state = start_login(&app, "%2F").await;
    let response = app
        .get(&format!("/auth/callback?code=ok&state={}", state), None)
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_failed_exchange_returns_to_login() {
    let app = setup().await;
    let state = start_login(&app, "%2F").await;

    let response = app
        .get(&format!("/auth/callback?code=bad&state={}", state), None)
        .await;
    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_offsite_next_is_ignored() {
    let app = setup().await;
    sqlx::query("INSERT INTO authorized_users (email, system_role) VALUES ('owner@example.com', 'manager')")
        .execute(app.pool())
        .await
        .unwrap();

    let state = start_login(&app, "%2F%2Fevil.example.com").await;
    let response = app
        .get(&format!("/auth/callback?code=ok&state={}", state), None)
        .await;
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = setup().await;
    let token = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let response = app.get("/auth/logout", Some(&token)).await;
    assert_eq!(location(&response), "/auth/login");

    let response = app.get("/dashboard", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

// =============================================================================
// Roles and module permissions
// =============================================================================

#[tokio::test]
async fn test_role_gates() {
    let app = setup().await;
    let employee = login_as(app.pool(), "crew@example.com", "employee", None).await;
    let manager = login_as(app.pool(), "boss@example.com", "manager", None).await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;
    let owner = login_as(app.pool(), "owner@example.com", "super_admin", None).await;

    let cases: [(&str, &str, StatusCode); 8] = [
        ("/export/quickbooks", manager.as_str(), StatusCode::FORBIDDEN),
        ("/export/quickbooks", admin.as_str(), StatusCode::OK),
        ("/reports/weekly/data", employee.as_str(), StatusCode::FORBIDDEN),
        ("/reports/weekly/data", manager.as_str(), StatusCode::OK),
        ("/api/admin/users", admin.as_str(), StatusCode::FORBIDDEN),
        ("/api/admin/users", owner.as_str(), StatusCode::OK),
        ("/settings", admin.as_str(), StatusCode::FORBIDDEN),
        ("/settings", owner.as_str(), StatusCode::OK),
    ];
    for (uri, token, expected) in cases {
        let response = app.get(uri, Some(token)).await;
        assert_eq!(response.status(), expected, "{}", uri);
    }
}

#[tokio::test]
async fn test_forbidden_is_json() {
    let app = setup().await;
    let manager = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let response = app.get("/api/admin/users", Some(&manager)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_employee_sees_only_own_receipts() {
    let app = setup().await;
    let ana = add_employee(app.pool(), "Ana", "+14075550101", None, Some("en")).await;
    let luis = add_employee(app.pool(), "Luis", "+14075550102", None, Some("es")).await;
    add_receipt(app.pool(), ana, "Home Depot", 48.15, "2026-02-10", "confirmed", None).await;
    let other = add_receipt(app.pool(), luis, "Lowe's", 12.00, "2026-02-10", "confirmed", None).await;

    let token = login_as(app.pool(), "ana@example.com", "employee", Some(ana)).await;
    let response = app.get("/api/receipts", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["employee_id"], ana);

    let response = app
        .get(&format!("/api/dashboard/receipt/{}", other), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unlinked_employee_user_sees_nothing() {
    let app = setup().await;
    let ana = add_employee(app.pool(), "Ana", "+14075550101", None, Some("en")).await;
    add_receipt(app.pool(), ana, "Home Depot", 48.15, "2026-02-10", "confirmed", None).await;

    let token = login_as(app.pool(), "nobody@example.com", "employee", None).await;
    let body = body_json(app.get("/api/receipts", Some(&token)).await).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_permission_override_revokes_module() {
    let app = setup().await;
    let owner = login_as(app.pool(), "owner@example.com", "super_admin", None).await;
    let manager = login_as(app.pool(), "boss@example.com", "manager", None).await;
    let manager_id: i64 =
        sqlx::query_scalar("SELECT id FROM authorized_users WHERE email = 'boss@example.com'")
            .fetch_one(app.pool())
            .await
            .unwrap();

    assert_eq!(app.get("/api/receipts", Some(&manager)).await.status(), StatusCode::OK);

    let uri = format!("/api/admin/users/{}/permissions", manager_id);
    let response = app
        .send_json("PUT", &uri, &owner, json!({"module": "crewledger", "access_level": "none"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.get("/api/receipts", Some(&manager)).await.status(),
        StatusCode::FORBIDDEN
    );

    let response = app
        .send_json("PUT", &uri, &owner, json!({"module": "crewledger", "access_level": null}))
        .await;
    assert_eq!(body_json(response).await["status"], "cleared");
    assert_eq!(app.get("/api/receipts", Some(&manager)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_deactivated_user_loses_session() {
    let app = setup().await;
    let owner = login_as(app.pool(), "owner@example.com", "super_admin", None).await;
    let manager = login_as(app.pool(), "boss@example.com", "manager", None).await;
    let manager_id: i64 =
        sqlx::query_scalar("SELECT id FROM authorized_users WHERE email = 'boss@example.com'")
            .fetch_one(app.pool())
            .await
            .unwrap();

    let response = app
        .send_json(
            "PUT",
            &format!("/api/admin/users/{}", manager_id),
            &owner,
            json!({"is_active": false}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get("/dashboard", Some(&manager)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_user_management() {
    let app = setup().await;
    let owner = login_as(app.pool(), "owner@example.com", "super_admin", None).await;
    let owner_id: i64 =
        sqlx::query_scalar("SELECT id FROM authorized_users WHERE email = 'owner@example.com'")
            .fetch_one(app.pool())
            .await
            .unwrap();

    let response = app
        .send_json(
            "POST",
            "/api/admin/users",
            &owner,
            json!({"email": " New.Manager@Example.com ", "system_role": "manager"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["email"], "new.manager@example.com");

    let response = app
        .send_json(
            "POST",
            "/api/admin/users",
            &owner,
            json!({"email": "new.manager@example.com"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send_json("POST", "/api/admin/users", &owner, json!({"email": "nope"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send_json(
            "DELETE",
            &format!("/api/admin/users/{}", owner_id),
            &owner,
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send_json(
            "DELETE",
            &format!("/api/admin/users/{}", created["id"]),
            &owner,
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
