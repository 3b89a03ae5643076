//! Weekly expense report: aggregation, rendering and delivery
//!
//! The report is framed per employee ("here is Omar's week"): a daily
//! spend summary first, then every receipt, with flagged ones called out.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

use crate::services::mailer::{MailError, Mailer, OutgoingEmail};

/// Report delivery errors
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("No report recipient configured")]
    NoRecipient,

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Database(#[from] crewledger_common::Error),
}

impl From<sqlx::Error> for ReportError {
    fn from(err: sqlx::Error) -> Self {
        ReportError::Database(err.into())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportLineItem {
    pub item_name: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub extended_price: Option<f64>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportReceipt {
    pub id: i64,
    pub vendor_name: String,
    pub vendor_city: Option<String>,
    pub vendor_state: Option<String>,
    pub purchase_date: Option<String>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    pub payment_method: Option<String>,
    pub status: String,
    pub flag_reason: Option<String>,
    pub is_return: bool,
    pub is_missed_receipt: bool,
    pub project_name: Option<String>,
    pub created_at: String,
    pub line_items: Vec<ReportLineItem>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DaySummary {
    pub spend: f64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeeSection {
    pub id: i64,
    pub name: String,
    pub total_spend: f64,
    pub receipt_count: usize,
    pub daily_summary: BTreeMap<String, DaySummary>,
    pub receipts: Vec<ReportReceipt>,
    pub flagged_receipts: Vec<ReportReceipt>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyReport {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub total_spend: f64,
    pub total_receipts: usize,
    pub flagged_count: usize,
    pub employees: Vec<EmployeeSection>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Statuses whose totals count toward spend
fn counts_toward_spend(status: &str) -> bool {
    status == "confirmed" || status == "pending"
}

/// Last full Monday to Sunday week before the one containing `today`
pub fn default_week_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let this_monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    let start = this_monday - Duration::days(7);
    (start, start + Duration::days(6))
}

/// Aggregate receipts created in `[start, end]` per employee
pub async fn generate_weekly_report(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
) -> crewledger_common::Result<WeeklyReport> {
    let start_s = start.format("%Y-%m-%d").to_string();
    let end_exclusive = (end + Duration::days(1)).format("%Y-%m-%d").to_string();

    let rows = sqlx::query(
        r#"
        SELECT r.*, e.first_name, e.full_name, p.name AS project_name
        FROM receipts r
        JOIN employees e ON r.employee_id = e.id
        LEFT JOIN projects p ON r.project_id = p.id
        WHERE r.created_at >= ? AND r.created_at < ?
          AND r.status NOT IN ('deleted', 'duplicate')
        ORDER BY e.first_name, e.id, r.created_at, r.id
        "#,
    )
    .bind(&start_s)
    .bind(&end_exclusive)
    .fetch_all(pool)
    .await?;

    let mut report = WeeklyReport {
        week_start: start,
        week_end: end,
        total_spend: 0.0,
        total_receipts: 0,
        flagged_count: 0,
        employees: Vec::new(),
    };

    for row in &rows {
        let employee_id: i64 = row.get("employee_id");
        let needs_section = report
            .employees
            .last()
            .map_or(true, |section| section.id != employee_id);
        if needs_section {
            let full_name: Option<String> = row.get("full_name");
            let name = full_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| row.get("first_name"));
            report.employees.push(EmployeeSection {
                id: employee_id,
                name,
                total_spend: 0.0,
                receipt_count: 0,
                daily_summary: BTreeMap::new(),
                receipts: Vec::new(),
                flagged_receipts: Vec::new(),
            });
        }

        let receipt = receipt_from_row(pool, row).await?;
        let spend = if counts_toward_spend(&receipt.status) {
            receipt.total.unwrap_or(0.0)
        } else {
            0.0
        };
        let day: String = receipt
            .purchase_date
            .as_deref()
            .unwrap_or(&receipt.created_at)
            .chars()
            .take(10)
            .collect();

        let Some(section) = report.employees.last_mut() else {
            continue;
        };
        section.total_spend += spend;
        section.receipt_count += 1;
        let entry = section.daily_summary.entry(day).or_default();
        entry.spend = round2(entry.spend + spend);
        entry.count += 1;
        if receipt.status == "flagged" {
            section.flagged_receipts.push(receipt.clone());
        }
        section.receipts.push(receipt);
    }

    for section in &mut report.employees {
        section.total_spend = round2(section.total_spend);
        report.total_spend += section.total_spend;
        report.total_receipts += section.receipt_count;
        report.flagged_count += section.flagged_receipts.len();
    }
    report.total_spend = round2(report.total_spend);

    Ok(report)
}

async fn receipt_from_row(
    pool: &SqlitePool,
    row: &sqlx::sqlite::SqliteRow,
) -> crewledger_common::Result<ReportReceipt> {
    let id: i64 = row.get("id");
    let items = sqlx::query(
        r#"
        SELECT li.item_name, li.quantity, li.unit_price, li.extended_price, c.name AS category
        FROM line_items li
        LEFT JOIN categories c ON li.category_id = c.id
        WHERE li.receipt_id = ?
        ORDER BY li.id
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let project: Option<String> = row.get("project_name");
    let matched: Option<String> = row.get("matched_project_name");

    Ok(ReportReceipt {
        id,
        vendor_name: row
            .get::<Option<String>, _>("vendor_name")
            .unwrap_or_else(|| "Unknown".to_string()),
        vendor_city: row.get("vendor_city"),
        vendor_state: row.get("vendor_state"),
        purchase_date: row.get("purchase_date"),
        subtotal: row.get("subtotal"),
        tax: row.get("tax"),
        total: row.get("total"),
        payment_method: row.get("payment_method"),
        status: row.get("status"),
        flag_reason: row.get("flag_reason"),
        is_return: row.get("is_return"),
        is_missed_receipt: row.get("is_missed_receipt"),
        project_name: project.or(matched),
        created_at: row.get("created_at"),
        line_items: items
            .iter()
            .map(|i| ReportLineItem {
                item_name: i.get("item_name"),
                quantity: i.get("quantity"),
                unit_price: i.get("unit_price"),
                extended_price: i.get("extended_price"),
                category: i.get("category"),
            })
            .collect(),
    })
}

/// Human date range
///
/// ```
/// use chrono::NaiveDate;
/// use crewledger_server::services::reports::format_date_range;
///
/// let d = |s| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
/// assert_eq!(format_date_range(d("2026-02-09"), d("2026-02-15")), "Feb 9 – 15, 2026");
/// assert_eq!(format_date_range(d("2026-02-27"), d("2026-03-05")), "Feb 27 – Mar 5, 2026");
/// assert_eq!(format_date_range(d("2025-12-29"), d("2026-01-04")), "Dec 29, 2025 – Jan 4, 2026");
/// ```
pub fn format_date_range(start: NaiveDate, end: NaiveDate) -> String {
    if start.year() != end.year() {
        format!("{} – {}", start.format("%b %-d, %Y"), end.format("%b %-d, %Y"))
    } else if start.month() != end.month() {
        format!("{} – {}, {}", start.format("%b %-d"), end.format("%b %-d"), end.year())
    } else {
        format!("{} – {}, {}", start.format("%b %-d"), end.day(), end.year())
    }
}

/// Weekday plus month/day, e.g. `Mon 2/9`; unparseable input passes through
pub fn format_date_short(date: &str) -> String {
    match NaiveDate::parse_from_str(date.get(..10).unwrap_or(date), "%Y-%m-%d") {
        Ok(d) => d.format("%a %-m/%-d").to_string(),
        Err(_) => date.to_string(),
    }
}

pub fn report_subject(report: &WeeklyReport) -> String {
    format!(
        "CrewLedger Weekly Report — {}",
        format_date_range(report.week_start, report.week_end)
    )
}

fn money(value: Option<f64>) -> String {
    value
        .map(|v| format!("${:.2}", v))
        .unwrap_or_else(|| "—".to_string())
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Plain-text rendering
pub fn render_text(report: &WeeklyReport) -> String {
    let mut out = String::new();
    out.push_str(&report_subject(report));
    out.push_str("\n\n");
    out.push_str(&format!(
        "Total spend: ${:.2} | Receipts: {} | Flagged: {}\n",
        report.total_spend, report.total_receipts, report.flagged_count
    ));

    for section in &report.employees {
        out.push_str(&format!(
            "\n== {} — ${:.2} ({} receipts) ==\n",
            section.name, section.total_spend, section.receipt_count
        ));
        for (day, summary) in &section.daily_summary {
            out.push_str(&format!(
                "  {}: ${:.2} ({})\n",
                format_date_short(day),
                summary.spend,
                summary.count
            ));
        }
        out.push('\n');
        for receipt in &section.receipts {
            let flag = if receipt.status == "flagged" { " [FLAGGED]" } else { "" };
            out.push_str(&format!(
                "  {} {} {}{}\n",
                receipt
                    .purchase_date
                    .as_deref()
                    .map(format_date_short)
                    .unwrap_or_else(|| "—".to_string()),
                receipt.vendor_name,
                money(receipt.total),
                flag
            ));
            if let Some(project) = &receipt.project_name {
                out.push_str(&format!("      Project: {}\n", project));
            }
            for item in &receipt.line_items {
                out.push_str(&format!(
                    "      - {} {}\n",
                    item.item_name.as_deref().unwrap_or("?"),
                    money(item.extended_price)
                ));
            }
            if let Some(reason) = receipt.flag_reason.as_deref().filter(|_| !flag.is_empty()) {
                out.push_str(&format!("      Flag: {}\n", reason));
            }
        }
    }

    out
}

/// HTML rendering
pub fn render_html(report: &WeeklyReport) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>");
    html.push_str(&escape_html(&report_subject(report)));
    html.push_str("</title></head><body style=\"font-family: Arial, sans-serif; color: #222;\">");
    html.push_str(&format!(
        "<h1>CrewLedger Weekly Report</h1><p>{}</p>",
        escape_html(&format_date_range(report.week_start, report.week_end))
    ));
    html.push_str(&format!(
        "<table><tr><td><strong>Total spend</strong></td><td>${:.2}</td></tr>\
         <tr><td><strong>Receipts</strong></td><td>{}</td></tr>\
         <tr><td><strong>Flagged</strong></td><td>{}</td></tr></table>",
        report.total_spend, report.total_receipts, report.flagged_count
    ));

    if report.employees.is_empty() {
        html.push_str("<p>No receipts were submitted this week.</p>");
    }

    for section in &report.employees {
        html.push_str(&format!(
            "<h2>{} &mdash; ${:.2}</h2><ul>",
            escape_html(&section.name),
            section.total_spend
        ));
        for (day, summary) in &section.daily_summary {
            html.push_str(&format!(
                "<li>{}: ${:.2} ({} receipt{})</li>",
                escape_html(&format_date_short(day)),
                summary.spend,
                summary.count,
                if summary.count == 1 { "" } else { "s" }
            ));
        }
        html.push_str("</ul><table border=\"1\" cellpadding=\"4\" cellspacing=\"0\">\
            <tr><th>Date</th><th>Vendor</th><th>Project</th><th>Items</th><th>Total</th><th>Status</th></tr>");
        for receipt in &section.receipts {
            let flagged = receipt.status == "flagged";
            let items = receipt
                .line_items
                .iter()
                .map(|i| escape_html(i.item_name.as_deref().unwrap_or("?")))
                .collect::<Vec<_>>()
                .join(", ");
            html.push_str(&format!(
                "<tr{}><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                if flagged { " style=\"background:#fff3cd\"" } else { "" },
                escape_html(receipt.purchase_date.as_deref().unwrap_or("")),
                escape_html(&receipt.vendor_name),
                escape_html(receipt.project_name.as_deref().unwrap_or("")),
                items,
                money(receipt.total),
                if flagged {
                    format!(
                        "FLAGGED: {}",
                        escape_html(receipt.flag_reason.as_deref().unwrap_or(""))
                    )
                } else {
                    escape_html(&receipt.status)
                }
            ));
        }
        html.push_str("</table>");
    }

    html.push_str("</body></html>");
    html
}

/// Whether a send produced an email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    /// No employee submitted anything in the range
    SkippedEmpty,
}

/// Generate, render and email the report for `[start, end]`
///
/// `recipient` falls back to `default_recipient` (the accountant address).
pub async fn send_weekly_report(
    pool: &SqlitePool,
    mailer: &dyn Mailer,
    start: NaiveDate,
    end: NaiveDate,
    recipient: Option<&str>,
    default_recipient: &str,
) -> Result<SendOutcome, ReportError> {
    let to = recipient
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(default_recipient.trim());
    if to.is_empty() {
        return Err(ReportError::NoRecipient);
    }

    let report = generate_weekly_report(pool, start, end).await?;
    if report.employees.is_empty() {
        info!(%start, %end, "No receipts in range, weekly report not sent");
        return Ok(SendOutcome::SkippedEmpty);
    }

    mailer
        .send(OutgoingEmail {
            to: to.to_string(),
            subject: report_subject(&report),
            text: render_text(&report),
            html: render_html(&report),
        })
        .await?;

    info!(
        %start,
        %end,
        employees = report.employees.len(),
        receipts = report.total_receipts,
        "Weekly report sent"
    );
    Ok(SendOutcome::Sent)
}
