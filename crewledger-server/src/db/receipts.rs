//! Receipt writes and shared receipt reads

use crewledger_common::db::RecordStatus;
use crewledger_common::Result;
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool};

use crate::services::ocr::OcrLineItem;

pub const FLAG_EMPLOYEE_REJECTED: &str = "Employee rejected OCR read";
pub const FLAG_MANUAL_ENTRY: &str = "Manual entry — needs review";
pub const FLAG_MISSED: &str = "Missed receipt";
pub const FLAG_MISSED_DETAILS: &str = "Missed receipt — details provided";
pub const FLAG_DOWNLOAD_FAILED: &str = "Image download failed — Twilio URL saved for retry";
pub const FLAG_OCR_FAILED: &str = "OCR processing failed";
pub const FLAG_DUPLICATE: &str = "Possible duplicate — similar receipt already exists";

/// Column values for a receipt insert
#[derive(Debug, Clone, Default)]
pub struct NewReceipt {
    pub employee_id: i64,
    pub image_path: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_city: Option<String>,
    pub vendor_state: Option<String>,
    pub purchase_date: Option<String>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    pub payment_method: Option<String>,
    pub project_id: Option<i64>,
    pub matched_project_name: Option<String>,
    pub category_id: Option<i64>,
    pub raw_ocr_json: Option<String>,
    pub status: RecordStatus,
    pub flag_reason: Option<String>,
    pub notes: Option<String>,
    pub is_missed_receipt: bool,
}

pub async fn insert_receipt<'e, E>(executor: E, new: &NewReceipt) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO receipts (
            employee_id, image_path, vendor_name, vendor_city, vendor_state, purchase_date,
            subtotal, tax, total, payment_method, project_id, matched_project_name,
            category_id, raw_ocr_json, status, flag_reason, notes, is_missed_receipt
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.employee_id)
    .bind(new.image_path.as_deref())
    .bind(new.vendor_name.as_deref())
    .bind(new.vendor_city.as_deref())
    .bind(new.vendor_state.as_deref())
    .bind(new.purchase_date.as_deref())
    .bind(new.subtotal)
    .bind(new.tax)
    .bind(new.total)
    .bind(new.payment_method.as_deref())
    .bind(new.project_id)
    .bind(new.matched_project_name.as_deref())
    .bind(new.category_id)
    .bind(new.raw_ocr_json.as_deref())
    .bind(new.status.as_str())
    .bind(new.flag_reason.as_deref())
    .bind(new.notes.as_deref())
    .bind(new.is_missed_receipt)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Insert extracted line items, all tagged with the receipt's category
pub async fn insert_line_items(
    conn: &mut sqlx::SqliteConnection,
    receipt_id: i64,
    items: &[OcrLineItem],
    category_id: Option<i64>,
) -> Result<()> {
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO line_items (receipt_id, item_name, quantity, unit_price, extended_price, category_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(receipt_id)
        .bind(item.item_name.as_deref())
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.extended_price)
        .bind(category_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn receipt_exists(pool: &SqlitePool, id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM receipts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Whether the receipt sits in the review queue as a possible duplicate
pub async fn is_flagged_duplicate(pool: &SqlitePool, id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM receipts WHERE id = ? AND status = 'flagged' AND flag_reason = ?",
    )
    .bind(id)
    .bind(FLAG_DUPLICATE)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// Move a receipt to `status`; confirming stamps `confirmed_at`
///
/// `flag_reason` replaces the stored reason when given.
pub async fn set_status(
    pool: &SqlitePool,
    id: i64,
    status: RecordStatus,
    flag_reason: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE receipts
        SET status = ?,
            flag_reason = COALESCE(?, flag_reason),
            confirmed_at = CASE WHEN ? = 'confirmed' THEN datetime('now') ELSE confirmed_at END
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(flag_reason)
    .bind(status.as_str())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Save free text from the employee and leave the receipt flagged for review
pub async fn save_note(pool: &SqlitePool, id: i64, note: &str, flag_reason: &str) -> Result<()> {
    sqlx::query(
        "UPDATE receipts SET notes = ?, flag_reason = ?, status = 'flagged' WHERE id = ?",
    )
    .bind(note)
    .bind(flag_reason)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Another live receipt from the same employee with the same vendor, total and date
pub async fn find_duplicate(
    pool: &SqlitePool,
    receipt_id: i64,
    employee_id: i64,
    vendor_name: &str,
    total: f64,
    purchase_date: &str,
) -> Result<Option<i64>> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM receipts
        WHERE employee_id = ?
          AND vendor_name = ?
          AND total = ?
          AND purchase_date = ?
          AND id != ?
          AND status NOT IN ('deleted', 'duplicate')
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(employee_id)
    .bind(vendor_name)
    .bind(total)
    .bind(purchase_date)
    .bind(receipt_id)
    .fetch_optional(pool)
    .await?;
    Ok(found)
}

/// Line item with its category name, as shown on the dashboard
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LineItemDetail {
    pub id: i64,
    pub item_name: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub extended_price: Option<f64>,
    pub category: Option<String>,
}

pub async fn line_items_for(pool: &SqlitePool, receipt_id: i64) -> Result<Vec<LineItemDetail>> {
    let items = sqlx::query_as::<_, LineItemDetail>(
        r#"
        SELECT li.id, li.item_name, li.quantity, li.unit_price, li.extended_price,
               c.name AS category
        FROM line_items li
        LEFT JOIN categories c ON c.id = li.category_id
        WHERE li.receipt_id = ?
        ORDER BY li.id
        "#,
    )
    .bind(receipt_id)
    .fetch_all(pool)
    .await?;
    Ok(items)
}

/// Receipt joined with employee, project and category names
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReceiptSummary {
    pub id: i64,
    pub employee_id: i64,
    pub employee_name: String,
    pub crew: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_city: Option<String>,
    pub vendor_state: Option<String>,
    pub purchase_date: Option<String>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    pub payment_method: Option<String>,
    pub project_id: Option<i64>,
    pub project_name: Option<String>,
    pub category: Option<String>,
    pub status: String,
    pub flag_reason: Option<String>,
    pub notes: Option<String>,
    pub is_return: bool,
    pub is_missed_receipt: bool,
    #[serde(skip)]
    pub image_path: Option<String>,
    pub created_at: String,
    pub confirmed_at: Option<String>,
}

/// SELECT and joins producing [`ReceiptSummary`] rows; append WHERE clauses to it
pub const RECEIPT_SUMMARY_SELECT: &str = r#"
    SELECT r.id, r.employee_id,
           COALESCE(NULLIF(TRIM(e.full_name), ''), e.first_name) AS employee_name,
           e.crew,
           r.vendor_name, r.vendor_city, r.vendor_state, r.purchase_date,
           r.subtotal, r.tax, r.total, r.payment_method, r.project_id,
           COALESCE(p.name, r.matched_project_name) AS project_name,
           c.name AS category,
           r.status, r.flag_reason, r.notes, r.is_return, r.is_missed_receipt,
           r.image_path, r.created_at, r.confirmed_at
    FROM receipts r
    JOIN employees e ON e.id = r.employee_id
    LEFT JOIN projects p ON p.id = r.project_id
    LEFT JOIN categories c ON c.id = r.category_id
"#;

pub async fn get_receipt_summary(pool: &SqlitePool, id: i64) -> Result<Option<ReceiptSummary>> {
    let receipt = sqlx::query_as::<_, ReceiptSummary>(&format!(
        "{} WHERE r.id = ?",
        RECEIPT_SUMMARY_SELECT
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(receipt)
}

/// A receipt together with its line items
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptWithItems {
    #[serde(flatten)]
    pub receipt: ReceiptSummary,
    pub line_items: Vec<LineItemDetail>,
}

pub async fn with_line_items(
    pool: &SqlitePool,
    receipts: Vec<ReceiptSummary>,
) -> Result<Vec<ReceiptWithItems>> {
    let mut out = Vec::with_capacity(receipts.len());
    for receipt in receipts {
        let line_items = line_items_for(pool, receipt.id).await?;
        out.push(ReceiptWithItems {
            receipt,
            line_items,
        });
    }
    Ok(out)
}
