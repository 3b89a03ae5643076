//! Document classification, OCR extraction and confirmation formatting
//!
//! Prompts go to a [`VisionClient`]; the replies are parsed leniently since
//! the model sometimes wraps JSON in markdown fences or quotes numbers.

use crewledger_common::db::{DocumentKind, Language};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::messaging::i18n::{doc_label, msg};
use crate::services::vision::{Detail, VisionClient, VisionError, VisionRequest};

const CLASSIFY_MAX_TOKENS: u32 = 100;
const EXTRACT_MAX_TOKENS: u32 = 1500;

/// Line items shown in an SMS before "+K more"
const MAX_ITEMS_IN_SMS: usize = 5;

const CLASSIFICATION_PROMPT: &str = r#"Look at this document image and classify it as one of these types:
- receipt: A retail receipt or register tape showing items purchased
- invoice: A business invoice requesting payment, typically with invoice number, terms, bill-to address
- packing_slip: A shipping/packing slip listing items shipped, typically with PO number, ship-to address
- purchase_order: A purchase order from a buyer to a vendor
- unknown: Cannot determine the type

Return ONLY valid JSON with this structure (no markdown, no explanation):
{"doc_type": "receipt", "confidence": 0.95}"#;

const RECEIPT_PROMPT: &str = r#"You are a receipt reading assistant. Extract ALL information from this receipt image and return it as valid JSON.

Return ONLY a JSON object with this exact structure (no markdown, no explanation):

{
  "vendor_name": "Store name exactly as printed",
  "vendor_city": "City if visible, null otherwise",
  "vendor_state": "Two-letter state code if visible, null otherwise",
  "purchase_date": "YYYY-MM-DD format",
  "subtotal": 0.00,
  "tax": 0.00,
  "total": 0.00,
  "payment_method": "CASH or last 4 digits of card (e.g. VISA 1234)",
  "category": "One of: Materials, Fuel, Food & Drinks, Tools & Equipment, Safety Gear, Lodging, Office & Admin, Other",
  "line_items": [
    {"item_name": "Item description as printed", "quantity": 1, "unit_price": 0.00, "extended_price": 0.00}
  ]
}

Rules:
- All dollar amounts as numbers (no $ sign)
- If a value is not visible or unreadable, use null
- For returns/refunds, use negative amounts
- If quantity is not explicitly shown, default to 1
- extended_price = quantity x unit_price
- Parse the date as YYYY-MM-DD regardless of how it appears
- Return ONLY valid JSON, no other text"#;

const BUSINESS_DOCUMENT_PROMPT: &str = r#"You are reading a business document (invoice, packing slip or purchase order). Extract its contents as valid JSON.

Return ONLY a JSON object with this structure (no markdown, no explanation):

{
  "vendor_name": "Vendor or supplier name",
  "vendor_address": "Vendor address if visible, null otherwise",
  "invoice_number": "Invoice number if present, null otherwise",
  "po_number": "Purchase order number if present, null otherwise",
  "purchase_date": "Document date in YYYY-MM-DD format",
  "ship_to": "Ship-to site or address if present, null otherwise",
  "subtotal": 0.00,
  "tax": 0.00,
  "total": 0.00,
  "payment_method": "Payment terms or method if shown, null otherwise",
  "line_items": [
    {"item_name": "Description", "quantity": 1, "unit": "EA", "unit_price": 0.00, "extended_price": 0.00}
  ]
}

Rules:
- All dollar amounts as numbers (no $ sign)
- If a value is not visible or unreadable, use null
- Return ONLY valid JSON, no other text"#;

/// OCR errors
#[derive(Debug, Error)]
pub enum OcrError {
    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error("Unparseable OCR response: {0}")]
    Parse(String),
}

/// One extracted line item
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrLineItem {
    pub item_name: Option<String>,
    pub quantity: f64,
    pub unit: Option<String>,
    pub unit_price: Option<f64>,
    pub extended_price: Option<f64>,
}

/// Structured fields extracted from a document image
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrDocument {
    pub vendor_name: Option<String>,
    pub vendor_city: Option<String>,
    pub vendor_state: Option<String>,
    pub vendor_address: Option<String>,
    pub purchase_date: Option<String>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    pub payment_method: Option<String>,
    pub project_name: Option<String>,
    pub category: Option<String>,
    pub invoice_number: Option<String>,
    pub po_number: Option<String>,
    pub ship_to: Option<String>,
    pub line_items: Vec<OcrLineItem>,
}

/// Image handed to the OCR functions
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
}

/// Classify a document image
///
/// Any failure, or an `unknown` verdict, is treated as a receipt.
pub async fn classify_document(vision: &dyn VisionClient, image: ImageRef<'_>) -> DocumentKind {
    let reply = vision
        .complete(VisionRequest {
            prompt: CLASSIFICATION_PROMPT,
            image: image.bytes,
            mime_type: image.mime_type,
            detail: Detail::Low,
            max_tokens: CLASSIFY_MAX_TOKENS,
        })
        .await;

    match reply {
        Ok(text) => parse_classification(&text),
        Err(e) => {
            tracing::warn!("Document classification failed, defaulting to receipt: {}", e);
            DocumentKind::Receipt
        }
    }
}

/// Document kind from the classifier's JSON reply
pub fn parse_classification(raw: &str) -> DocumentKind {
    let parsed = serde_json::from_str::<Value>(strip_code_fences(raw)).ok();
    let kind = parsed
        .as_ref()
        .and_then(|v| v.get("doc_type"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<DocumentKind>().ok());

    match kind {
        Some(DocumentKind::Unknown) | None => DocumentKind::Receipt,
        Some(kind) => kind,
    }
}

/// Run OCR on an image using the prompt for `kind`
pub async fn extract_document(
    vision: &dyn VisionClient,
    image: ImageRef<'_>,
    kind: DocumentKind,
) -> Result<OcrDocument, OcrError> {
    let prompt = match kind {
        DocumentKind::Receipt | DocumentKind::Unknown => RECEIPT_PROMPT,
        _ => BUSINESS_DOCUMENT_PROMPT,
    };

    let text = vision
        .complete(VisionRequest {
            prompt,
            image: image.bytes,
            mime_type: image.mime_type,
            detail: Detail::High,
            max_tokens: EXTRACT_MAX_TOKENS,
        })
        .await?;

    tracing::info!("OCR raw response length: {} chars", text.len());
    parse_ocr_response(&text)
}

/// Remove a surrounding markdown code fence, if present
fn strip_code_fences(raw: &str) -> &str {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text;
    }
    let body = text
        .split_once('\n')
        .map(|(_, rest)| rest)
        .unwrap_or("");
    body.trim_end().trim_end_matches("```").trim()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Number from a JSON value; numeric strings (with `$` or `,`) are accepted
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().map(round2),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .map(round2),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() && s.trim() != "null" => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse the model's reply into an [`OcrDocument`]
///
/// The reply must be a JSON object (optionally fenced). Missing line items
/// become an empty list, numbers round to cents and a missing quantity is 1.
pub fn parse_ocr_response(raw: &str) -> Result<OcrDocument, OcrError> {
    let value: Value = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| OcrError::Parse(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| OcrError::Parse("response is not a JSON object".to_string()))?;

    let line_items = obj
        .get("line_items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|item| OcrLineItem {
                    item_name: text(item.get("item_name")),
                    quantity: number(item.get("quantity")).unwrap_or(1.0),
                    unit: text(item.get("unit")),
                    unit_price: number(item.get("unit_price")),
                    extended_price: number(item.get("extended_price"))
                        .or_else(|| number(item.get("total_price"))),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(OcrDocument {
        vendor_name: text(obj.get("vendor_name")),
        vendor_city: text(obj.get("vendor_city")),
        vendor_state: text(obj.get("vendor_state")),
        vendor_address: text(obj.get("vendor_address")),
        purchase_date: text(obj.get("purchase_date")).or_else(|| text(obj.get("date"))),
        subtotal: number(obj.get("subtotal")),
        tax: number(obj.get("tax")),
        total: number(obj.get("total")),
        payment_method: text(obj.get("payment_method")),
        project_name: text(obj.get("project_name")),
        category: text(obj.get("category")),
        invoice_number: text(obj.get("invoice_number")),
        po_number: text(obj.get("po_number")),
        ship_to: text(obj.get("ship_to")).or_else(|| text(obj.get("ship_to_site"))),
        line_items,
    })
}

/// `YYYY-MM-DD` as `MM/DD/YY`; anything else passes through
fn short_date(date: &str) -> String {
    match chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => d.format("%m/%d/%y").to_string(),
        Err(_) => date.to_string(),
    }
}

fn items_line(items: &[OcrLineItem]) -> String {
    if items.is_empty() {
        return "No line items detected".to_string();
    }

    let parts: Vec<String> = items
        .iter()
        .take(MAX_ITEMS_IN_SMS)
        .map(|item| {
            let name = item.item_name.as_deref().unwrap_or("?");
            match item.extended_price.or(item.unit_price) {
                Some(price) => format!("{} (${:.2})", name, price),
                None => name.to_string(),
            }
        })
        .collect();

    let count = items.len();
    let mut line = format!(
        "{} item{}: {}",
        count,
        if count == 1 { "" } else { "s" },
        parts.join(", ")
    );
    if count > MAX_ITEMS_IN_SMS {
        line.push_str(&format!(" +{} more", count - MAX_ITEMS_IN_SMS));
    }
    line
}

fn headline(doc: &OcrDocument) -> String {
    let vendor = doc.vendor_name.as_deref().unwrap_or("Unknown vendor");
    let location = [doc.vendor_city.as_deref(), doc.vendor_state.as_deref()]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let location = if location.is_empty() {
        String::new()
    } else {
        format!(", {}", location)
    };
    let date = doc
        .purchase_date
        .as_deref()
        .map(short_date)
        .unwrap_or_else(|| "unknown date".to_string());
    let total = doc
        .total
        .map(|t| format!("${:.2}", t))
        .unwrap_or_else(|| "unknown amount".to_string());

    format!("{}{} — {} — {}", vendor, location, date, total)
}

/// The SMS the employee answers YES/NO to after a receipt is read
///
/// ```text
/// Ace Home & Supply, Kissimmee FL — 02/18/26 — $100.64
/// 3 items: Utility Lighter ($7.59), Propane Exchange ($27.99), Batteries ($65.06)
/// Project: Sparrow
///
/// Is that correct, Omar? Reply YES to save or NO to flag.
/// ```
pub fn format_confirmation_message(
    doc: &OcrDocument,
    first_name: &str,
    project: Option<&str>,
    lang: Language,
) -> String {
    let mut lines = vec![headline(doc), items_line(&doc.line_items)];
    if let Some(project) = project.filter(|p| !p.trim().is_empty()) {
        lines.push(format!("Project: {}", project.trim()));
    }
    lines.push(String::new());
    lines.push(msg("confirmation_question", lang, &[("name", first_name)]));
    lines.join("\n")
}

/// Summary SMS for an invoice, packing slip or purchase order
pub fn format_document_summary(
    kind: DocumentKind,
    doc: &OcrDocument,
    first_name: &str,
    lang: Language,
) -> String {
    let label = doc_label(kind, lang);
    let mut title = label.to_uppercase();
    if let Some(number) = doc.invoice_number.as_deref().or(doc.po_number.as_deref()) {
        title.push_str(&format!(" #{}", number));
    }

    let mut lines = vec![title, headline(doc), items_line(&doc.line_items)];
    if let Some(ship_to) = doc.ship_to.as_deref() {
        lines.push(format!("Ship to: {}", ship_to));
    }
    lines.push(String::new());
    lines.push(msg(
        "document_prompt",
        lang,
        &[("name", first_name), ("doc", label)],
    ));
    lines.join("\n")
}
