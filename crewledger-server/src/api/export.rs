//! QuickBooks-ready CSV export

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use chrono::NaiveDate;
use crewledger_common::db::SystemRole;
use serde::Deserialize;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::info;

use crate::api::session::require_role;
use crate::api::week_range;
use crate::db::receipts::line_items_for;
use crate::db::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const QUICKBOOKS_COLUMNS: [&str; 9] = [
    "Date",
    "Vendor",
    "Account",
    "Amount",
    "Tax",
    "Total",
    "Payment Method",
    "Memo",
    "Line Items",
];

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub week_start: Option<String>,
    pub week_end: Option<String>,
    pub employee_id: Option<i64>,
    pub project: Option<String>,
    pub category: Option<String>,
    pub format: Option<String>,
}

/// Resolved export filters
#[derive(Debug, Clone)]
pub struct ExportFilter {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub employee_id: Option<i64>,
    pub project: Option<String>,
    pub category: Option<String>,
}

impl ExportFilter {
    pub fn from_query(query: &ExportQuery) -> ApiResult<Self> {
        let (start, end) = week_range(query.week_start.as_deref(), query.week_end.as_deref())?;
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Ok(Self {
            start,
            end,
            employee_id: query.employee_id,
            project: clean(&query.project),
            category: clean(&query.category),
        })
    }

    pub fn filename(&self) -> String {
        format!("crewledger_export_{}_to_{}.csv", self.start, self.end)
    }
}

/// `1234.5` as `$1,234.50`
pub fn format_money(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as i64;
    let digits = (cents / 100).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

/// `YYYY-MM-DD` (optionally followed by a time) as `MM/DD/YYYY`; other text passes through
pub fn format_date_mm_dd_yyyy(date: Option<&str>) -> String {
    let Some(date) = date.filter(|d| !d.is_empty()) else {
        return String::new();
    };
    date.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(|d| d.format("%m/%d/%Y").to_string())
        .unwrap_or_else(|| date.to_string())
}

fn amount(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// `name[ xQ] ($x.xx)` for each item, joined with ` | `
fn line_items_summary(items: &[crate::db::receipts::LineItemDetail]) -> String {
    items
        .iter()
        .map(|item| {
            let quantity = match item.quantity {
                Some(q) if q != 1.0 && q != 0.0 => format!(" x{:.0}", q),
                _ => String::new(),
            };
            let price = item.extended_price.map(format_money).unwrap_or_default();
            format!(
                "{}{} ({})",
                item.item_name.as_deref().unwrap_or(""),
                quantity,
                price
            )
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Render the export for `filter` as CSV text
pub async fn build_quickbooks_csv(pool: &SqlitePool, filter: &ExportFilter) -> ApiResult<String> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT r.id, r.purchase_date, r.vendor_name, r.subtotal, r.tax, r.total,
               r.payment_method,
               COALESCE(NULLIF(TRIM(e.full_name), ''), e.first_name) AS employee_name,
               COALESCE(p.name, r.matched_project_name) AS project_name
        FROM receipts r
        JOIN employees e ON e.id = r.employee_id
        LEFT JOIN projects p ON p.id = r.project_id
        WHERE r.status IN ('confirmed', 'pending')
        "#,
    );
    qb.push(" AND r.purchase_date >= ")
        .push_bind(filter.start.to_string())
        .push(" AND r.purchase_date <= ")
        .push_bind(filter.end.to_string());
    if let Some(id) = filter.employee_id {
        qb.push(" AND r.employee_id = ").push_bind(id);
    }
    if let Some(project) = &filter.project {
        qb.push(" AND (p.name = ")
            .push_bind(project.clone())
            .push(" OR r.matched_project_name = ")
            .push_bind(project.clone())
            .push(")");
    }
    qb.push(" ORDER BY r.purchase_date, r.id");

    let rows = qb.build().fetch_all(pool).await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(QUICKBOOKS_COLUMNS)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut exported = 0usize;
    for row in rows {
        let id: i64 = row.get("id");
        let items = line_items_for(pool, id).await?;

        if let Some(category) = &filter.category {
            let matches = items.iter().any(|i| {
                i.category
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(category))
            });
            if !matches {
                continue;
            }
        }

        let account = items
            .iter()
            .find_map(|i| i.category.clone())
            .unwrap_or_default();
        let employee: String = row.get("employee_name");
        let memo = match row.get::<Option<String>, _>("project_name") {
            Some(project) if !project.is_empty() => format!("{} — {}", project, employee),
            _ => employee,
        };

        writer
            .write_record([
                format_date_mm_dd_yyyy(row.get::<Option<String>, _>("purchase_date").as_deref()),
                row.get::<Option<String>, _>("vendor_name").unwrap_or_default(),
                account,
                amount(row.get("subtotal")),
                amount(row.get("tax")),
                amount(row.get("total")),
                row.get::<Option<String>, _>("payment_method").unwrap_or_default(),
                memo,
                line_items_summary(&items),
            ])
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        exported += 1;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!(start = %filter.start, end = %filter.end, rows = exported, "QuickBooks export built");
    String::from_utf8(bytes).map_err(|e| ApiError::Internal(e.to_string()))
}

/// CSV download response for `filter`
pub async fn csv_download(pool: &SqlitePool, filter: &ExportFilter) -> ApiResult<Response> {
    let body = build_quickbooks_csv(pool, filter).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filter.filename()),
            ),
        ],
        body,
    )
        .into_response())
}

/// GET /export/quickbooks
pub async fn quickbooks_export(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    require_role(&user, SystemRole::CompanyAdmin)?;
    let filter = ExportFilter::from_query(&query)?;
    csv_download(&state.db, &filter).await
}

pub fn export_routes() -> Router<AppState> {
    Router::new().route("/export/quickbooks", get(quickbooks_export))
}
