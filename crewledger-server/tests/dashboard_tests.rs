//! Dashboard summary, flagged review queue and ledger search

mod helpers;

use axum::http::StatusCode;
use helpers::*;
use serde_json::{json, Value};
use sqlx::Row;

struct Ledger {
    ana: i64,
    flagged: i64,
    sparrow: i64,
}

/// Week of 2026-02-09..15 plus one receipt in the week before
async fn seed_ledger(app: &TestApp) -> Ledger {
    let pool = app.pool();
    let ana = add_employee(pool, "Ana", "+14075550101", Some("Crew A"), Some("en")).await;
    let luis = add_employee(pool, "Luis", "+14075550102", Some("Crew B"), Some("es")).await;
    let sparrow = add_project(pool, "Sparrow").await;

    add_receipt(pool, ana, "Home Depot", 48.15, "2026-02-10", "confirmed", Some(sparrow)).await;
    add_receipt(pool, ana, "Shell", 20.00, "2026-02-11", "pending", None).await;
    let flagged = add_receipt(pool, ana, "Wawa", 5.00, "2026-02-12", "flagged", None).await;
    add_receipt(pool, luis, "Lowes", 30.00, "2026-02-12", "confirmed", None).await;
    add_receipt(pool, luis, "Ace Hardware", 100.00, "2026-02-03", "confirmed", None).await;

    Ledger { ana, flagged, sparrow }
}

const WEEK: &str = "week_start=2026-02-09&week_end=2026-02-15";

#[tokio::test]
async fn test_summary_totals() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let response = app
        .get(&format!("/api/dashboard/summary?{}", WEEK), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["week_start"], "2026-02-09");
    assert_eq!(body["week_total"], 98.15);
    assert_eq!(body["week_receipt_count"], 3);
    assert_eq!(body["previous_week_total"], 100.0);
    assert_eq!(body["flagged_count"], 1);

    let by_crew = body["by_crew"].as_array().unwrap();
    assert_eq!(by_crew[0]["id"], ledger.ana);
    assert_eq!(by_crew[0]["crew"], "Crew A");
    assert_eq!(by_crew[0]["total"], 68.15);
    assert_eq!(by_crew[0]["count"], 2);

    let by_project = body["by_project"].as_array().unwrap();
    assert_eq!(by_project[0]["name"], "Unassigned");
    assert_eq!(by_project[1]["name"], "Sparrow");

    assert_eq!(body["by_cardholder"][0]["name"], "CARD 1234");
    assert_eq!(body["recent_activity"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_summary_scoped_for_employee() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "ana@example.com", "employee", Some(ledger.ana)).await;

    let body = body_json(
        app.get(&format!("/api/dashboard/summary?{}", WEEK), Some(&token))
            .await,
    )
    .await;
    assert_eq!(body["week_total"], 68.15);
    assert_eq!(body["previous_week_total"], 0.0);
    assert_eq!(body["by_crew"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_summary_rejects_bad_dates() {
    let app = setup().await;
    let token = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let response = app
        .get("/api/dashboard/summary?week_start=02-09-2026", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(
            "/api/dashboard/summary?week_start=2026-02-15&week_end=2026-02-09",
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Flagged review
// =============================================================================

async fn status_of(app: &TestApp, id: i64) -> String {
    sqlx::query_scalar("SELECT status FROM receipts WHERE id = ?")
        .bind(id)
        .fetch_one(app.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_flagged_queue_and_approve() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    let body = body_json(app.get("/api/dashboard/flagged", Some(&token)).await).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["flagged"][0]["id"], ledger.flagged);
    assert_eq!(body["flagged"][0]["flag_reason"], "OCR processing failed");

    let uri = format!("/api/dashboard/flagged/{}/approve", ledger.flagged);
    let response = app.send_json("POST", &uri, &token, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(status_of(&app, ledger.flagged).await, "confirmed");

    // No longer flagged
    let response = app.send_json("POST", &uri, &token, json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dismiss_rejects_receipt() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    let uri = format!("/api/dashboard/flagged/{}/dismiss", ledger.flagged);
    let body = body_json(app.send_json("POST", &uri, &token, json!({})).await).await;
    assert_eq!(body["status"], "dismissed");
    assert_eq!(status_of(&app, ledger.flagged).await, "rejected");
}

#[tokio::test]
async fn test_edit_corrects_and_confirms() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    let uri = format!("/api/dashboard/flagged/{}/edit", ledger.flagged);
    let response = app
        .send_json(
            "POST",
            &uri,
            &token,
            json!({"vendor": "Wawa #812", "total": 6.25, "project": "sparrow"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let row = sqlx::query("SELECT vendor_name, total, status, project_id FROM receipts WHERE id = ?")
        .bind(ledger.flagged)
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("vendor_name"), "Wawa #812");
    assert_eq!(row.get::<f64, _>("total"), 6.25);
    assert_eq!(row.get::<String, _>("status"), "confirmed");
    assert_eq!(row.get::<Option<i64>, _>("project_id"), Some(ledger.sparrow));

    let response = app
        .send_json("POST", &uri, &token, json!({"date": "Feb 12"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manager_cannot_edit() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let uri = format!("/api/dashboard/flagged/{}/approve", ledger.flagged);
    let response = app.send_json("POST", &uri, &token, json!({})).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// =============================================================================
// Search and detail
// =============================================================================

async fn search(app: &TestApp, token: &str, query: &str) -> Value {
    let response = app
        .get(&format!("/api/dashboard/search?{}", query), Some(token))
        .await;
    assert_eq!(response.status(), StatusCode::OK, "{}", query);
    body_json(response).await
}

#[tokio::test]
async fn test_search_filters_and_pagination() {
    let app = setup().await;
    seed_ledger(&app).await;
    let token = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let body = search(&app, &token, "vendor=home").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["vendor_name"], "Home Depot");

    let body = search(&app, &token, "amount_min=25&sort=amount&order=asc").await;
    let totals: Vec<f64> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["total"].as_f64().unwrap())
        .collect();
    assert_eq!(totals, vec![30.0, 48.15, 100.0]);

    let body = search(&app, &token, "date_start=2026-02-09&date_end=2026-02-15&per_page=2&page=2").await;
    assert_eq!(body["total"], 4);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);

    let body = search(&app, &token, "project=sparrow&status=confirmed").await;
    assert_eq!(body["total"], 1);

    let body = search(&app, &token, "employee=luis").await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["filters"]["employees"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_search_ignores_unknown_sort_column() {
    let app = setup().await;
    seed_ledger(&app).await;
    let token = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let body = search(&app, &token, "sort=total%3B%20DROP%20TABLE%20receipts").await;
    assert_eq!(body["total"], 5);
}

#[tokio::test]
async fn test_receipt_detail_and_missing_image() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let response = app
        .get(&format!("/api/dashboard/receipt/{}", ledger.flagged), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["vendor_name"], "Wawa");
    assert_eq!(body["has_image"], false);

    let response = app
        .get(&format!("/receipt-image/{}", ledger.flagged), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/dashboard/receipt/9999", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_employee_receipts_history() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "boss@example.com", "manager", None).await;

    let body = body_json(
        app.get(
            &format!("/api/dashboard/employee/{}/receipts?status=flagged", ledger.ana),
            Some(&token),
        )
        .await,
    )
    .await;
    let rows = body["receipts"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], ledger.flagged);
}

#[tokio::test]
async fn test_manual_receipt_entry() {
    let app = setup().await;
    let ledger = seed_ledger(&app).await;
    let token = login_as(app.pool(), "office@example.com", "company_admin", None).await;

    let response = app
        .send_json(
            "POST",
            "/api/receipts",
            &token,
            json!({
                "employee_id": ledger.ana,
                "vendor_name": "Publix",
                "purchase_date": "2026-02-13",
                "total": 14.99,
                "project": "Sparrow"
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    let row = sqlx::query("SELECT project_id, total FROM receipts WHERE id = ?")
        .bind(id)
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<Option<i64>, _>("project_id"), Some(ledger.sparrow));

    let response = app
        .send_json(
            "POST",
            "/api/receipts",
            &token,
            json!({"employee_id": 9999, "total": 1.0}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
