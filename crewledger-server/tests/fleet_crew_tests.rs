//! Fleet maintenance, crew roster and certification alert endpoints

mod helpers;

use axum::http::StatusCode;
use chrono::{Duration, Local};
use helpers::*;
use serde_json::json;

async fn add_vehicle(app: &TestApp, nickname: &str, vin: &str) -> i64 {
    sqlx::query(
        "INSERT INTO vehicles (year, make, model, nickname, vin, plate_number) VALUES (2019, 'Ford', 'F-150', ?, ?, 'ABC123')",
    )
    .bind(nickname)
    .bind(vin)
    .execute(app.pool())
    .await
    .unwrap()
    .last_insert_rowid()
}

fn days_from_today(days: i64) -> String {
    (Local::now().date_naive() + Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

// =============================================================================
// Fleet
// =============================================================================

#[tokio::test]
async fn test_fleet_overview_and_service_due() {
    let app = setup().await;
    let white = add_vehicle(&app, "Big White", "1FTEW1E50KFA00001").await;
    add_vehicle(&app, "Old Blue", "1FTEW1E50KFA00002").await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    let uri = format!("/fleet/{}/maintenance", white);
    let response = app
        .send_json(
            "POST",
            &uri,
            &admin,
            json!({"service_date": days_from_today(-10), "description": "Oil change", "cost": 89.99, "mileage": 84200, "vendor": "Jiffy Lube"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    app.send_json(
        "POST",
        &uri,
        &admin,
        json!({"service_date": days_from_today(-200), "description": "Tires", "cost": 640.00, "vendor": "Discount Tire"}),
    )
    .await;

    let body = body_json(app.get("/fleet/", Some(&admin)).await).await;
    assert_eq!(body["summary"]["total_vehicles"], 2);
    assert_eq!(body["summary"]["total_spend"], 729.99);
    // Old Blue has no history
    assert_eq!(body["summary"]["vehicles_needing_service"], 1);

    let big_white = body["vehicles"]
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["nickname"] == "Big White")
        .unwrap()
        .clone();
    assert_eq!(big_white["maintenance_count"], 2);
    assert_eq!(big_white["latest_mileage"], 84200);

    let detail = body_json(app.get(&format!("/fleet/{}", white), Some(&admin)).await).await;
    assert_eq!(detail["record_count"], 2);
    assert_eq!(detail["maintenance"][0]["description"], "Oil change");
    assert_eq!(detail["vendor_summary"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_maintenance_edit_and_delete() {
    let app = setup().await;
    let truck = add_vehicle(&app, "Big White", "1FTEW1E50KFA00001").await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;
    let manager = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let response = app
        .send_json(
            "POST",
            &format!("/fleet/{}/maintenance", truck),
            &admin,
            json!({"description": "  "}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let created = body_json(
        app.send_json(
            "POST",
            &format!("/fleet/{}/maintenance", truck),
            &admin,
            json!({"service_date": "2026-01-15", "description": "Brakes", "cost": 300.0}),
        )
        .await,
    )
    .await;
    let record = created["id"].as_i64().unwrap();
    let uri = format!("/fleet/maintenance/{}", record);

    let response = app.send_json("PUT", &uri, &admin, json!({"cost": 325.5})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cost: f64 = sqlx::query_scalar("SELECT cost FROM vehicle_maintenance WHERE id = ?")
        .bind(record)
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(cost, 325.5);

    let response = app.send_json("PUT", &uri, &admin, json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send_json("DELETE", &uri, &manager, json!({})).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.send_json("DELETE", &uri, &admin, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.send_json("DELETE", &uri, &admin, json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_vehicle_is_404() {
    let app = setup().await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;
    assert_eq!(app.get("/fleet/42", Some(&admin)).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_employee_role_has_no_fleet_access() {
    let app = setup().await;
    let token = login_as(app.pool(), "crew@example.com", "employee", None).await;
    assert_eq!(app.get("/fleet/", Some(&token)).await.status(), StatusCode::FORBIDDEN);
}

// =============================================================================
// Crew roster and projects
// =============================================================================

#[tokio::test]
async fn test_register_employee_and_mask_phone() {
    let app = setup().await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;
    let manager = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let response = app
        .send_json(
            "POST",
            "/api/employees",
            &admin,
            json!({"first_name": "Omar", "phone_number": "(407) 555-0177", "crew": "Crew C", "language": "es"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .send_json(
            "POST",
            "/api/employees",
            &admin,
            json!({"first_name": "Omar Again", "phone_number": "+14075550177"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = body_json(app.get("/api/crew/employees", Some(&admin)).await).await;
    assert_eq!(body[0]["phone_number"], "+14075550177");

    let body = body_json(app.get("/api/crew/employees", Some(&manager)).await).await;
    assert_eq!(body[0]["phone_number"], "***-***-0177");
}

#[tokio::test]
async fn test_projects() {
    let app = setup().await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    let response = app
        .send_json("POST", "/api/projects", &admin, json!({"name": "Sparrow", "city": "Kissimmee"}))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .send_json("POST", "/api/projects", &admin, json!({"name": "Sparrow"}))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send_json("POST", "/api/projects", &admin, json!({"name": "Falcon", "status": "paused"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(app.get("/api/projects", Some(&admin)).await).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

// =============================================================================
// Certifications
// =============================================================================

#[tokio::test]
async fn test_certification_refresh_creates_alerts_once() {
    let app = setup().await;
    let ana = add_employee(app.pool(), "Ana", "+14075550101", None, Some("en")).await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    for (cert_type, expires) in [
        ("forklift", days_from_today(-3)),
        ("aerial-lift", days_from_today(30)),
        ("fall-protection", days_from_today(400)),
    ] {
        let response = app
            .send_json(
                "POST",
                "/api/crew/certifications",
                &admin,
                json!({"employee_id": ana, "cert_type": cert_type, "expires_at": expires}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED, "{}", cert_type);
    }

    let summary = body_json(
        app.send_json("POST", "/api/crew/certifications/refresh", &admin, json!({}))
            .await,
    )
    .await;
    assert_eq!(summary["checked"], 3);
    assert_eq!(summary["alerts_created"], 2);

    let again = body_json(
        app.send_json("POST", "/api/crew/certifications/refresh", &admin, json!({}))
            .await,
    )
    .await;
    assert_eq!(again["alerts_created"], 0);

    let alerts = body_json(app.get("/api/crew/cert-alerts", Some(&admin)).await).await;
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 2);

    let alert_id = alerts[0]["id"].as_i64().unwrap();
    let response = app
        .send_json(
            "POST",
            &format!("/api/crew/cert-alerts/{}/acknowledge", alert_id),
            &admin,
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let open = body_json(app.get("/api/crew/cert-alerts", Some(&admin)).await).await;
    assert_eq!(open.as_array().unwrap().len(), 1);
    let all = body_json(
        app.get("/api/crew/cert-alerts?include_acknowledged=true", Some(&admin))
            .await,
    )
    .await;
    let acknowledged = all
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["id"] == alert_id)
        .unwrap();
    assert_eq!(acknowledged["acknowledged_by"], "office@example.com");
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_crew_profile_summarizes_certs() {
    let app = setup().await;
    let ana = add_employee(app.pool(), "Ana", "+14075550101", Some("Crew A"), Some("en")).await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    app.send_json(
        "POST",
        "/api/crew/certifications",
        &admin,
        json!({"employee_id": ana, "cert_type": "Forklift", "expires_at": days_from_today(-1)}),
    )
    .await;
    app.send_json(
        "POST",
        "/api/crew/certifications",
        &admin,
        json!({"employee_id": ana, "cert_type": "fall-protection"}),
    )
    .await;

    let body = body_json(app.get(&format!("/crew/{}", ana), Some(&admin)).await).await;
    assert_eq!(body["employee"]["name"], "Ana");
    assert_eq!(body["certifications"].as_array().unwrap().len(), 2);
    assert_eq!(body["cert_summary"]["expired"], 1);
    assert_eq!(body["cert_summary"]["no_expiry"], 1);
}

#[tokio::test]
async fn test_certification_validation() {
    let app = setup().await;
    let ana = add_employee(app.pool(), "Ana", "+14075550101", None, Some("en")).await;
    let admin = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    let response = app
        .send_json(
            "POST",
            "/api/crew/certifications",
            &admin,
            json!({"employee_id": ana, "cert_type": "underwater-welding"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send_json(
            "POST",
            "/api/crew/certifications",
            &admin,
            json!({"employee_id": ana, "cert_type": "forklift", "expires_at": "12/31/2026"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
