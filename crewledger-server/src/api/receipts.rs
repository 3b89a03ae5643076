//! Receipt ledger API

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Extension, Json, Router,
};
use chrono::NaiveDate;
use crewledger_common::db::{RecordStatus, SystemRole};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::export::{csv_download, ExportFilter, ExportQuery};
use crate::api::session::{require_permission, require_role, require_visible};
use crate::db::receipts::{insert_receipt, NewReceipt, ReceiptSummary, RECEIPT_SUMMARY_SELECT};
use crate::db::{employees, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::services::matching::resolve_project;
use crate::services::permissions::{AccessLevel, Module};
use crate::AppState;

const LEDGER_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub employee_id: Option<i64>,
}

/// GET /api/receipts
pub async fn list_receipts(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ReceiptSummary>>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;
    let scope = user.visible_employee();
    let status = query.status.as_deref().filter(|s| !s.is_empty());

    let receipts = sqlx::query_as::<_, ReceiptSummary>(&format!(
        r#"{}
        WHERE (? IS NULL OR r.employee_id = ?)
          AND (? IS NULL OR r.employee_id = ?)
          AND (? IS NULL OR r.status = ?)
          AND r.status != 'deleted'
        ORDER BY r.created_at DESC, r.id DESC
        LIMIT ?"#,
        RECEIPT_SUMMARY_SELECT
    ))
    .bind(scope)
    .bind(scope)
    .bind(query.employee_id)
    .bind(query.employee_id)
    .bind(status)
    .bind(status)
    .bind(LEDGER_LIMIT)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(receipts))
}

#[derive(Debug, Deserialize)]
pub struct CreateReceipt {
    pub employee_id: i64,
    pub vendor_name: Option<String>,
    pub vendor_city: Option<String>,
    pub vendor_state: Option<String>,
    pub purchase_date: Option<String>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    pub payment_method: Option<String>,
    pub project: Option<String>,
    pub notes: Option<String>,
    pub status: Option<RecordStatus>,
}

/// POST /api/receipts
pub async fn create_receipt(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateReceipt>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::Edit).await?;
    require_visible(&user, body.employee_id)?;

    if employees::get_employee(&state.db, body.employee_id).await?.is_none() {
        return Err(ApiError::BadRequest(format!(
            "Unknown employee {}",
            body.employee_id
        )));
    }
    if let Some(date) = body.purchase_date.as_deref() {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest(format!("Invalid purchase_date: {}", date)))?;
    }
    if body.total.is_some_and(|t| !t.is_finite()) {
        return Err(ApiError::BadRequest("total must be a number".to_string()));
    }

    let project = body
        .project
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let project_id = match project {
        Some(name) => resolve_project(&state.db, name).await?,
        None => None,
    };

    let new = NewReceipt {
        employee_id: body.employee_id,
        vendor_name: body.vendor_name,
        vendor_city: body.vendor_city,
        vendor_state: body.vendor_state,
        purchase_date: body.purchase_date,
        subtotal: body.subtotal,
        tax: body.tax,
        total: body.total,
        payment_method: body.payment_method,
        project_id,
        matched_project_name: project.map(str::to_string),
        notes: body.notes,
        status: body.status.unwrap_or(RecordStatus::Pending),
        ..Default::default()
    };
    let id = insert_receipt(&state.db, &new).await?;
    tracing::info!(receipt_id = id, user_id = user.user_id, "Receipt created from dashboard");

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// GET /api/receipts/export
pub async fn export_receipts(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    require_role(&user, SystemRole::CompanyAdmin)?;
    match query.format.as_deref().unwrap_or("csv") {
        "csv" => {}
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unsupported export format: {}",
                other
            )))
        }
    }
    let filter = ExportFilter::from_query(&query)?;
    csv_download(&state.db, &filter).await
}

pub fn receipt_routes() -> Router<AppState> {
    Router::new()
        .route("/api/receipts", get(list_receipts).post(create_receipt))
        .route("/api/receipts/export", get(export_receipts))
}
