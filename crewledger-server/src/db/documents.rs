//! Invoices, packing slips and purchase orders

use crewledger_common::db::{DocumentKind, Language, RecordStatus};
use crewledger_common::{Error, Result};
use sqlx::SqlitePool;

use crate::services::ocr::OcrDocument;

/// Context stored alongside an extracted document
#[derive(Debug, Clone, Copy)]
pub struct DocumentMeta<'a> {
    pub employee_id: i64,
    pub project_id: Option<i64>,
    pub image_path: Option<&'a str>,
    pub raw_ocr_json: Option<&'a str>,
    pub language: Language,
    pub status: RecordStatus,
    pub flag_reason: Option<&'a str>,
}

/// Insert a business document and its items in one transaction
pub async fn insert_document(
    pool: &SqlitePool,
    kind: DocumentKind,
    doc: &OcrDocument,
    meta: DocumentMeta<'_>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let id = match kind {
        DocumentKind::Invoice => {
            let id = sqlx::query(
                r#"
                INSERT INTO invoices (
                    employee_id, vendor_name, vendor_address, invoice_number, date, project_id,
                    subtotal, tax, total, payment_method, status, flag_reason, image_path,
                    raw_ocr_json, language
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(meta.employee_id)
            .bind(doc.vendor_name.as_deref())
            .bind(doc.vendor_address.as_deref())
            .bind(doc.invoice_number.as_deref())
            .bind(doc.purchase_date.as_deref())
            .bind(meta.project_id)
            .bind(doc.subtotal)
            .bind(doc.tax)
            .bind(doc.total)
            .bind(doc.payment_method.as_deref())
            .bind(meta.status.as_str())
            .bind(meta.flag_reason)
            .bind(meta.image_path)
            .bind(meta.raw_ocr_json)
            .bind(meta.language.as_str())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for item in &doc.line_items {
                sqlx::query(
                    r#"
                    INSERT INTO invoice_line_items (invoice_id, item_name, quantity, unit_price, total_price)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(item.item_name.as_deref())
                .bind(item.quantity)
                .bind(item.unit_price)
                .bind(item.extended_price)
                .execute(&mut *tx)
                .await?;
            }
            id
        }
        DocumentKind::PackingSlip => {
            let id = sqlx::query(
                r#"
                INSERT INTO packing_slips (
                    employee_id, vendor_name, vendor_address, po_number, date, project_id,
                    ship_to_site, item_count, status, flag_reason, image_path, raw_ocr_json, language
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(meta.employee_id)
            .bind(doc.vendor_name.as_deref())
            .bind(doc.vendor_address.as_deref())
            .bind(doc.po_number.as_deref())
            .bind(doc.purchase_date.as_deref())
            .bind(meta.project_id)
            .bind(doc.ship_to.as_deref())
            .bind(doc.line_items.len() as i64)
            .bind(meta.status.as_str())
            .bind(meta.flag_reason)
            .bind(meta.image_path)
            .bind(meta.raw_ocr_json)
            .bind(meta.language.as_str())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for item in &doc.line_items {
                sqlx::query(
                    "INSERT INTO packing_slip_items (packing_slip_id, item_name, quantity, unit) VALUES (?, ?, ?, ?)",
                )
                .bind(id)
                .bind(item.item_name.as_deref())
                .bind(item.quantity)
                .bind(item.unit.as_deref())
                .execute(&mut *tx)
                .await?;
            }
            id
        }
        DocumentKind::PurchaseOrder => sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                employee_id, vendor_name, vendor_address, po_number, date, project_id,
                subtotal, tax, total, status, flag_reason, image_path, raw_ocr_json, language
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(meta.employee_id)
        .bind(doc.vendor_name.as_deref())
        .bind(doc.vendor_address.as_deref())
        .bind(doc.po_number.as_deref())
        .bind(doc.purchase_date.as_deref())
        .bind(meta.project_id)
        .bind(doc.subtotal)
        .bind(doc.tax)
        .bind(doc.total)
        .bind(meta.status.as_str())
        .bind(meta.flag_reason)
        .bind(meta.image_path)
        .bind(meta.raw_ocr_json)
        .bind(meta.language.as_str())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid(),
        DocumentKind::Receipt | DocumentKind::Unknown => {
            return Err(Error::InvalidInput(
                "Receipts are stored through the receipts table".to_string(),
            ))
        }
    };

    tx.commit().await?;
    Ok(id)
}

/// Vendor of an existing document; `None` when the row is gone
///
/// The inner option is the vendor name itself, which OCR may not have found.
pub async fn document_vendor(
    pool: &SqlitePool,
    kind: DocumentKind,
    id: i64,
) -> Result<Option<Option<String>>> {
    let row: Option<(Option<String>,)> = sqlx::query_as(&format!(
        "SELECT vendor_name FROM {} WHERE id = ?",
        kind.table()
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(vendor,)| vendor))
}

pub async fn set_document_status(
    pool: &SqlitePool,
    kind: DocumentKind,
    id: i64,
    status: RecordStatus,
    flag_reason: Option<&str>,
) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE {} SET status = ?, flag_reason = COALESCE(?, flag_reason) WHERE id = ?",
        kind.table()
    ))
    .bind(status.as_str())
    .bind(flag_reason)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ocr::OcrLineItem;
    use crewledger_common::db::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_packing_slip_counts_items() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        sqlx::query("INSERT INTO employees (id, phone_number, first_name) VALUES (1, '+14075551234', 'Omar')")
            .execute(&pool)
            .await
            .unwrap();

        let doc = OcrDocument {
            vendor_name: Some("ABC Supply".into()),
            po_number: Some("PO-778".into()),
            line_items: vec![
                OcrLineItem {
                    item_name: Some("Shingles".into()),
                    quantity: 20.0,
                    unit: Some("bundle".into()),
                    ..Default::default()
                },
                OcrLineItem {
                    item_name: Some("Drip edge".into()),
                    quantity: 12.0,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let id = insert_document(
            &pool,
            DocumentKind::PackingSlip,
            &doc,
            DocumentMeta {
                employee_id: 1,
                project_id: None,
                image_path: None,
                raw_ocr_json: None,
                language: Language::En,
                status: RecordStatus::Pending,
                flag_reason: None,
            },
        )
        .await
        .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT item_count FROM packing_slips WHERE id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        set_document_status(&pool, DocumentKind::PackingSlip, id, RecordStatus::Confirmed, None)
            .await
            .unwrap();
        assert_eq!(
            document_vendor(&pool, DocumentKind::PackingSlip, id).await.unwrap(),
            Some(Some("ABC Supply".to_string()))
        );
        assert_eq!(
            document_vendor(&pool, DocumentKind::Invoice, 99).await.unwrap(),
            None
        );
    }
}
