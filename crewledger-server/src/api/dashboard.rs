//! Dashboard JSON API: weekly summary, flagged queue, search and receipt detail

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{Duration, NaiveDate};
use crewledger_common::db::RecordStatus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::api::session::{require_permission, require_visible};
use crate::api::week_range;
use crate::db::receipts::{
    self, get_receipt_summary, line_items_for, with_line_items, ReceiptSummary, ReceiptWithItems,
    RECEIPT_SUMMARY_SELECT,
};
use crate::db::{employees, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::pagination::{calculate_pagination, DEFAULT_PER_PAGE};
use crate::services::matching::resolve_project;
use crate::services::permissions::{AccessLevel, Module};
use crate::services::vision::mime_for_extension;
use crate::AppState;

const RECENT_ACTIVITY_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct WeekQuery {
    pub week_start: Option<String>,
    pub week_end: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SpendGroup {
    pub name: String,
    pub total: f64,
    pub count: i64,
}

/// Spend for one crew member
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CrewSpend {
    pub id: i64,
    pub name: String,
    pub crew: Option<String>,
    pub total: f64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub week_total: f64,
    pub week_receipt_count: i64,
    pub previous_week_total: f64,
    pub flagged_count: i64,
    pub by_crew: Vec<CrewSpend>,
    pub by_project: Vec<SpendGroup>,
    pub by_cardholder: Vec<SpendGroup>,
    pub recent_activity: Vec<ReceiptSummary>,
}

/// Spend within `[start, end]` by purchase date, grouped on `group_expr`
async fn spend_by(
    pool: &SqlitePool,
    group_expr: &str,
    start: NaiveDate,
    end: NaiveDate,
    scope: Option<i64>,
) -> ApiResult<Vec<SpendGroup>> {
    let groups = sqlx::query_as::<_, SpendGroup>(&format!(
        r#"
        SELECT {} AS name, ROUND(COALESCE(SUM(r.total), 0.0), 2) AS total, COUNT(*) AS count
        FROM receipts r
        JOIN employees e ON e.id = r.employee_id
        LEFT JOIN projects p ON p.id = r.project_id
        WHERE r.status IN ('confirmed', 'pending')
          AND r.purchase_date BETWEEN ? AND ?
          AND (? IS NULL OR r.employee_id = ?)
        GROUP BY 1
        ORDER BY total DESC, name
        "#,
        group_expr
    ))
    .bind(start.to_string())
    .bind(end.to_string())
    .bind(scope)
    .bind(scope)
    .fetch_all(pool)
    .await?;
    Ok(groups)
}

async fn spend_by_employee(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
    scope: Option<i64>,
) -> ApiResult<Vec<CrewSpend>> {
    let rows = sqlx::query_as::<_, CrewSpend>(
        r#"
        SELECT e.id, COALESCE(NULLIF(TRIM(e.full_name), ''), e.first_name) AS name, e.crew,
               ROUND(COALESCE(SUM(r.total), 0.0), 2) AS total, COUNT(r.id) AS count
        FROM receipts r
        JOIN employees e ON e.id = r.employee_id
        WHERE r.status IN ('confirmed', 'pending')
          AND r.purchase_date BETWEEN ? AND ?
          AND (? IS NULL OR r.employee_id = ?)
        GROUP BY e.id
        ORDER BY total DESC, name
        "#,
    )
    .bind(start.to_string())
    .bind(end.to_string())
    .bind(scope)
    .bind(scope)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn week_totals(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
    scope: Option<i64>,
) -> ApiResult<(f64, i64)> {
    let row = sqlx::query(
        r#"
        SELECT ROUND(COALESCE(SUM(total), 0.0), 2) AS total, COUNT(*) AS count
        FROM receipts
        WHERE status IN ('confirmed', 'pending')
          AND purchase_date BETWEEN ? AND ?
          AND (? IS NULL OR employee_id = ?)
        "#,
    )
    .bind(start.to_string())
    .bind(end.to_string())
    .bind(scope)
    .bind(scope)
    .fetch_one(pool)
    .await?;
    Ok((row.get("total"), row.get("count")))
}

/// GET /api/dashboard/summary
pub async fn summary(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<WeekQuery>,
) -> ApiResult<Json<SummaryResponse>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;
    let scope = user.visible_employee();
    let (start, end) = week_range(query.week_start.as_deref(), query.week_end.as_deref())?;

    let (week_total, week_receipt_count) = week_totals(&state.db, start, end, scope).await?;
    let (previous_week_total, _) = week_totals(
        &state.db,
        start - Duration::days(7),
        end - Duration::days(7),
        scope,
    )
    .await?;

    let flagged_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM receipts WHERE status = 'flagged' AND (? IS NULL OR employee_id = ?)",
    )
    .bind(scope)
    .bind(scope)
    .fetch_one(&state.db)
    .await?;

    let recent_activity = sqlx::query_as::<_, ReceiptSummary>(&format!(
        "{} WHERE (? IS NULL OR r.employee_id = ?) ORDER BY r.created_at DESC, r.id DESC LIMIT ?",
        RECEIPT_SUMMARY_SELECT
    ))
    .bind(scope)
    .bind(scope)
    .bind(RECENT_ACTIVITY_LIMIT)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(SummaryResponse {
        week_start: start,
        week_end: end,
        week_total,
        week_receipt_count,
        previous_week_total,
        flagged_count,
        by_crew: spend_by_employee(&state.db, start, end, scope).await?,
        by_project: spend_by(
            &state.db,
            "COALESCE(p.name, r.matched_project_name, 'Unassigned')",
            start,
            end,
            scope,
        )
        .await?,
        by_cardholder: spend_by(
            &state.db,
            "COALESCE(r.payment_method, 'Unknown')",
            start,
            end,
            scope,
        )
        .await?,
        recent_activity,
    }))
}

#[derive(Debug, Serialize)]
pub struct FlaggedResponse {
    pub flagged: Vec<ReceiptWithItems>,
    pub count: usize,
}

/// GET /api/dashboard/flagged
pub async fn flagged(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<FlaggedResponse>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;
    let scope = user.visible_employee();

    let rows = sqlx::query_as::<_, ReceiptSummary>(&format!(
        "{} WHERE r.status = 'flagged' AND (? IS NULL OR r.employee_id = ?) ORDER BY r.created_at DESC, r.id DESC",
        RECEIPT_SUMMARY_SELECT
    ))
    .bind(scope)
    .bind(scope)
    .fetch_all(&state.db)
    .await?;

    let flagged = with_line_items(&state.db, rows).await?;
    let count = flagged.len();
    Ok(Json(FlaggedResponse { flagged, count }))
}

/// Status of a receipt the user may edit; 404 when missing
async fn editable_status(state: &AppState, user: &CurrentUser, id: i64) -> ApiResult<String> {
    require_permission(state, user, Module::CrewLedger, AccessLevel::Edit).await?;
    let row: Option<(i64, String)> =
        sqlx::query_as("SELECT employee_id, status FROM receipts WHERE id = ?")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;
    let (employee_id, status) =
        row.ok_or_else(|| ApiError::NotFound(format!("Receipt {} not found", id)))?;
    require_visible(user, employee_id)?;
    Ok(status)
}

async fn resolve_flagged(
    state: &AppState,
    user: &CurrentUser,
    id: i64,
    to: RecordStatus,
    label: &str,
) -> ApiResult<Json<Value>> {
    let status = editable_status(state, user, id).await?;
    if status != RecordStatus::Flagged.as_str() {
        return Err(ApiError::BadRequest(format!(
            "Receipt {} is {}, not flagged",
            id, status
        )));
    }
    receipts::set_status(&state.db, id, to, None).await?;
    tracing::info!(receipt_id = id, user_id = user.user_id, "Flagged receipt {}", label);
    Ok(Json(json!({ "status": label, "id": id })))
}

/// POST /api/dashboard/flagged/:id/approve
pub async fn approve(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    resolve_flagged(&state, &user, id, RecordStatus::Confirmed, "approved").await
}

/// POST /api/dashboard/flagged/:id/dismiss
pub async fn dismiss(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    resolve_flagged(&state, &user, id, RecordStatus::Rejected, "dismissed").await
}

#[derive(Debug, Deserialize)]
pub struct EditReceipt {
    pub vendor: Option<String>,
    pub total: Option<f64>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub date: Option<String>,
    pub payment_method: Option<String>,
    pub project: Option<String>,
}

/// POST /api/dashboard/flagged/:id/edit
///
/// Applies the provided fields and confirms the receipt.
pub async fn edit(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<EditReceipt>,
) -> ApiResult<Json<Value>> {
    editable_status(&state, &user, id).await?;

    if let Some(date) = body.date.as_deref() {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest(format!("Invalid date: {}", date)))?;
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

    sqlx::query(
        r#"
        UPDATE receipts
        SET vendor_name = COALESCE(?, vendor_name),
            total = COALESCE(?, total),
            subtotal = COALESCE(?, subtotal),
            tax = COALESCE(?, tax),
            purchase_date = COALESCE(?, purchase_date),
            payment_method = COALESCE(?, payment_method),
            matched_project_name = COALESCE(?, matched_project_name),
            project_id = CASE WHEN ? IS NULL THEN project_id ELSE ? END,
            status = 'confirmed',
            confirmed_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(body.vendor.as_deref())
    .bind(body.total)
    .bind(body.subtotal)
    .bind(body.tax)
    .bind(body.date.as_deref())
    .bind(body.payment_method.as_deref())
    .bind(project)
    .bind(project)
    .bind(project_id)
    .bind(id)
    .execute(&state.db)
    .await?;

    tracing::info!(receipt_id = id, user_id = user.user_id, "Receipt edited and confirmed");
    Ok(Json(json!({ "status": "updated", "id": id })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub employee: Option<String>,
    pub employee_id: Option<i64>,
    pub project: Option<String>,
    pub vendor: Option<String>,
    pub category: Option<String>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    pub status: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Append the WHERE clause for a search
fn push_search_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &SearchQuery, scope: Option<i64>) {
    qb.push(" WHERE 1=1");

    if let Some(own) = scope {
        qb.push(" AND r.employee_id = ").push_bind(own);
    }
    match non_empty(&query.status) {
        Some(status) => {
            qb.push(" AND r.status = ").push_bind(status);
        }
        None => {
            qb.push(" AND r.status NOT IN ('deleted', 'duplicate')");
        }
    }
    if let Some(start) = non_empty(&query.date_start) {
        qb.push(" AND r.purchase_date >= ").push_bind(start);
    }
    if let Some(end) = non_empty(&query.date_end) {
        qb.push(" AND r.purchase_date <= ").push_bind(end);
    }
    if let Some(id) = query.employee_id {
        qb.push(" AND r.employee_id = ").push_bind(id);
    }
    if let Some(name) = non_empty(&query.employee) {
        let pattern = format!("%{}%", name);
        qb.push(" AND (e.first_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR e.full_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(project) = non_empty(&query.project) {
        let pattern = format!("%{}%", project);
        qb.push(" AND (p.name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR r.matched_project_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(vendor) = non_empty(&query.vendor) {
        qb.push(" AND r.vendor_name LIKE ").push_bind(format!("%{}%", vendor));
    }
    if let Some(category) = non_empty(&query.category) {
        qb.push(" AND (LOWER(c.name) = LOWER(")
            .push_bind(category.clone())
            .push(") OR EXISTS (SELECT 1 FROM line_items li JOIN categories lc ON lc.id = li.category_id WHERE li.receipt_id = r.id AND LOWER(lc.name) = LOWER(")
            .push_bind(category)
            .push(")))");
    }
    if let Some(min) = query.amount_min {
        qb.push(" AND r.total >= ").push_bind(min);
    }
    if let Some(max) = query.amount_max {
        qb.push(" AND r.total <= ").push_bind(max);
    }
}

/// ORDER BY expression for a sort key; unknown keys sort by date
fn sort_expression(sort: Option<&str>) -> &'static str {
    match sort.unwrap_or("date") {
        "amount" => "r.total",
        "employee" => "employee_name",
        "vendor" => "r.vendor_name",
        "project" => "project_name",
        _ => "COALESCE(r.purchase_date, r.created_at)",
    }
}

#[derive(Debug, Serialize)]
pub struct NamedOption {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct SearchFilters {
    pub employees: Vec<NamedOption>,
    pub projects: Vec<NamedOption>,
    pub categories: Vec<NamedOption>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ReceiptSummary>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
    pub filters: SearchFilters,
}

fn named_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Vec<NamedOption> {
    rows.iter()
        .map(|r| NamedOption {
            id: r.get("id"),
            name: r.get("name"),
        })
        .collect()
}

async fn search_filters(pool: &SqlitePool, scope: Option<i64>) -> ApiResult<SearchFilters> {
    let employees = sqlx::query(
        "SELECT id, COALESCE(NULLIF(TRIM(full_name), ''), first_name) AS name \
         FROM employees WHERE (? IS NULL OR id = ?) ORDER BY name",
    )
    .bind(scope)
    .bind(scope)
    .fetch_all(pool)
    .await?;
    let projects = sqlx::query("SELECT id, name FROM projects ORDER BY name")
        .fetch_all(pool)
        .await?;
    let categories =
        sqlx::query("SELECT id, name FROM categories WHERE is_active = 1 ORDER BY name")
            .fetch_all(pool)
            .await?;

    Ok(SearchFilters {
        employees: named_rows(employees),
        projects: named_rows(projects),
        categories: named_rows(categories),
    })
}

/// GET /api/dashboard/search
pub async fn search(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;
    let scope = user.visible_employee();

    let mut count_qb = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM receipts r JOIN employees e ON e.id = r.employee_id \
         LEFT JOIN projects p ON p.id = r.project_id LEFT JOIN categories c ON c.id = r.category_id",
    );
    push_search_filters(&mut count_qb, &query, scope);
    let total: i64 = count_qb.build_query_scalar().fetch_one(&state.db).await?;

    let pagination = calculate_pagination(
        total,
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(DEFAULT_PER_PAGE),
    );

    let direction = match query.order.as_deref() {
        Some(o) if o.eq_ignore_ascii_case("asc") => "ASC",
        _ => "DESC",
    };

    let mut qb = QueryBuilder::<Sqlite>::new(RECEIPT_SUMMARY_SELECT);
    push_search_filters(&mut qb, &query, scope);
    qb.push(format!(
        " ORDER BY {} {}, r.id {}",
        sort_expression(query.sort.as_deref()),
        direction,
        direction
    ));
    qb.push(" LIMIT ")
        .push_bind(pagination.per_page)
        .push(" OFFSET ")
        .push_bind(pagination.offset);
    let results = qb
        .build_query_as::<ReceiptSummary>()
        .fetch_all(&state.db)
        .await?;

    let filters = search_filters(&state.db, scope).await?;

    Ok(Json(SearchResponse {
        results,
        total,
        page: pagination.page,
        per_page: pagination.per_page,
        total_pages: pagination.total_pages,
        filters,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EmployeeReceiptsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/dashboard/employee/:id/receipts
pub async fn employee_receipts(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<EmployeeReceiptsQuery>,
) -> ApiResult<Json<Value>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;
    require_visible(&user, id)?;

    let employee = employees::get_employee(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Employee {} not found", id)))?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let status = non_empty(&query.status);
    let receipts = sqlx::query_as::<_, ReceiptSummary>(&format!(
        "{} WHERE r.employee_id = ? AND (? IS NULL OR r.status = ?) ORDER BY r.created_at DESC, r.id DESC LIMIT ?",
        RECEIPT_SUMMARY_SELECT
    ))
    .bind(id)
    .bind(status.as_deref())
    .bind(status.as_deref())
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    let count = receipts.len();
    Ok(Json(json!({
        "employee": {
            "id": employee.id,
            "name": employee.display_name(),
            "first_name": employee.first_name,
            "crew": employee.crew,
            "is_active": employee.is_active,
        },
        "receipts": receipts,
        "count": count,
    })))
}

/// Whether a stored image path points at a readable local file
fn local_image(path: Option<&str>) -> Option<&str> {
    path.filter(|p| !p.starts_with("http://") && !p.starts_with("https://"))
        .filter(|p| std::path::Path::new(p).is_file())
}

/// GET /api/dashboard/receipt/:id
pub async fn receipt_detail(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;

    let receipt = get_receipt_summary(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Receipt {} not found", id)))?;
    require_visible(&user, receipt.employee_id)?;

    let has_image = local_image(receipt.image_path.as_deref()).is_some();
    let line_items = line_items_for(&state.db, id).await?;

    let mut body = serde_json::to_value(&receipt)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Value::Object(map) = &mut body {
        map.insert("line_items".into(), serde_json::to_value(&line_items).unwrap_or_default());
        map.insert("has_image".into(), Value::Bool(has_image));
    }
    Ok(Json(body))
}

/// GET /receipt-image/:id
pub async fn receipt_image(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;

    let receipt = get_receipt_summary(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Receipt {} not found", id)))?;
    require_visible(&user, receipt.employee_id)?;

    let path = local_image(receipt.image_path.as_deref())
        .ok_or_else(|| ApiError::NotFound(format!("No image for receipt {}", id)))?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| ApiError::NotFound(format!("No image for receipt {}", id)))?;

    let extension = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg");
    Ok(([(header::CONTENT_TYPE, mime_for_extension(extension))], bytes).into_response())
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/api/dashboard/summary", get(summary))
        .route("/api/dashboard/flagged", get(flagged))
        .route("/api/dashboard/flagged/:id/approve", post(approve))
        .route("/api/dashboard/flagged/:id/dismiss", post(dismiss))
        .route("/api/dashboard/flagged/:id/edit", post(edit))
        .route("/api/dashboard/search", get(search))
        .route("/api/dashboard/employee/:id/receipts", get(employee_receipts))
        .route("/api/dashboard/receipt/:id", get(receipt_detail))
        .route("/receipt-image/:id", get(receipt_image))
}
