//! Document intake: download, classify, extract, persist

use chrono::Local;
use crewledger_common::db::{ConversationStep, DocumentKind, Employee, Language, RecordStatus};
use crewledger_common::Result;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{conversation, documents, receipts, StateTarget};
use crate::db::documents::DocumentMeta;
use crate::db::receipts::NewReceipt;
use crate::messaging::i18n::msg;
use crate::messaging::router::InboundMedia;
use crate::services::matching::{resolve_category, resolve_project};
use crate::services::ocr::{
    classify_document, extract_document, format_confirmation_message, format_document_summary,
    ImageRef, OcrDocument,
};
use crate::services::twilio::{extension_for, MediaFetcher};
use crate::services::vision::VisionClient;

/// Images smaller than this are probably thumbnails or blurry
pub const SMALL_IMAGE_BYTES: usize = 10 * 1024;

/// Turns an inbound MMS attachment into a stored record and a reply
pub struct Intake {
    vision: Arc<dyn VisionClient>,
    media: Arc<dyn MediaFetcher>,
    storage_path: PathBuf,
}

impl Intake {
    pub fn new(
        vision: Arc<dyn VisionClient>,
        media: Arc<dyn MediaFetcher>,
        storage_path: PathBuf,
    ) -> Self {
        Self {
            vision,
            media,
            storage_path,
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Process one attachment sent by `employee`
    ///
    /// `body` is the text sent with the photo and is treated as a project
    /// name. Leaves the conversation in `awaiting_confirmation` or
    /// `awaiting_doc_confirm` on success and `idle` on failure.
    pub async fn process(
        &self,
        pool: &SqlitePool,
        employee: &Employee,
        lang: Language,
        media: &InboundMedia,
        body: &str,
    ) -> Result<String> {
        let name = employee.first_name.as_str();

        let payload = match self.media.fetch(&media.url).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(employee_id = employee.id, "Media download failed: {}", e);
                let receipt_id = receipts::insert_receipt(
                    pool,
                    &NewReceipt {
                        employee_id: employee.id,
                        image_path: Some(media.url.clone()),
                        matched_project_name: project_hint(body),
                        status: RecordStatus::Flagged,
                        flag_reason: Some(receipts::FLAG_DOWNLOAD_FAILED.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
                info!(employee_id = employee.id, receipt_id, "Flagged receipt for failed download");
                conversation::reset_to_idle(pool, employee.id).await?;
                return Ok(msg("image_download_failed", lang, &[("name", name)]));
            }
        };

        let content_type = if payload.content_type.is_empty() {
            media.content_type.as_str()
        } else {
            payload.content_type.as_str()
        };
        let extension = extension_for(content_type);
        let image_path = self.save_image(&employee.first_name, extension, &payload.bytes).await?;
        let image_path_text = image_path.to_string_lossy().to_string();
        info!(
            employee_id = employee.id,
            bytes = payload.bytes.len(),
            "Saved media to {}",
            image_path.display()
        );

        let mut reply = Vec::new();
        if payload.bytes.len() < SMALL_IMAGE_BYTES {
            reply.push(msg("image_quality_warning", lang, &[]));
        }

        let mime_type = crate::services::vision::mime_for_extension(extension);
        let image = ImageRef {
            bytes: &payload.bytes,
            mime_type,
        };

        let kind = classify_document(self.vision.as_ref(), image).await;
        info!(employee_id = employee.id, kind = kind.as_str(), "Document classified");

        let hint = project_hint(body);
        match kind {
            DocumentKind::Receipt | DocumentKind::Unknown => {
                self.receipt(pool, employee, lang, image, &image_path_text, hint, &mut reply)
                    .await?
            }
            kind => {
                self.business_document(
                    pool,
                    employee,
                    lang,
                    kind,
                    image,
                    &image_path_text,
                    hint,
                    &mut reply,
                )
                .await?
            }
        }

        Ok(reply.join("\n\n"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn receipt(
        &self,
        pool: &SqlitePool,
        employee: &Employee,
        lang: Language,
        image: ImageRef<'_>,
        image_path: &str,
        hint: Option<String>,
        reply: &mut Vec<String>,
    ) -> Result<()> {
        let name = employee.first_name.as_str();

        let doc = match extract_document(self.vision.as_ref(), image, DocumentKind::Receipt).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(employee_id = employee.id, "Receipt OCR failed: {}", e);
                let receipt_id = receipts::insert_receipt(
                    pool,
                    &NewReceipt {
                        employee_id: employee.id,
                        image_path: Some(image_path.to_string()),
                        matched_project_name: hint,
                        status: RecordStatus::Flagged,
                        flag_reason: Some(receipts::FLAG_OCR_FAILED.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
                info!(employee_id = employee.id, receipt_id, "Flagged receipt for failed OCR");
                conversation::reset_to_idle(pool, employee.id).await?;
                reply.push(msg("ocr_failed", lang, &[("name", name)]));
                return Ok(());
            }
        };

        let project_text = hint.or_else(|| doc.project_name.clone());
        let project_id = match project_text.as_deref() {
            Some(text) => resolve_project(pool, text).await?,
            None => None,
        };
        let category_id =
            resolve_category(pool, doc.category.as_deref(), doc.vendor_name.as_deref()).await?;

        let mut tx = pool.begin().await?;
        let receipt_id = receipts::insert_receipt(
            &mut *tx,
            &NewReceipt {
                employee_id: employee.id,
                image_path: Some(image_path.to_string()),
                vendor_name: doc.vendor_name.clone(),
                vendor_city: doc.vendor_city.clone(),
                vendor_state: doc.vendor_state.clone(),
                purchase_date: doc.purchase_date.clone(),
                subtotal: doc.subtotal,
                tax: doc.tax,
                total: doc.total,
                payment_method: doc.payment_method.clone(),
                project_id,
                matched_project_name: project_text.clone(),
                category_id,
                raw_ocr_json: serde_json::to_string(&doc).ok(),
                status: RecordStatus::Pending,
                ..Default::default()
            },
        )
        .await?;
        receipts::insert_line_items(&mut tx, receipt_id, &doc.line_items, category_id).await?;
        tx.commit().await?;

        info!(
            employee_id = employee.id,
            receipt_id,
            items = doc.line_items.len(),
            "Receipt saved, awaiting confirmation"
        );

        let duplicate = self.check_duplicate(pool, employee.id, receipt_id, &doc).await?;

        conversation::set_state(
            pool,
            employee.id,
            ConversationStep::AwaitingConfirmation,
            StateTarget::Receipt(receipt_id),
        )
        .await?;

        let project_label = match project_id {
            Some(id) => project_name(pool, id).await?,
            None => project_text,
        };
        reply.push(format_confirmation_message(
            &doc,
            name,
            project_label.as_deref(),
            lang,
        ));
        if duplicate {
            reply.push(msg("duplicate_warning", lang, &[]));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn business_document(
        &self,
        pool: &SqlitePool,
        employee: &Employee,
        lang: Language,
        kind: DocumentKind,
        image: ImageRef<'_>,
        image_path: &str,
        hint: Option<String>,
        reply: &mut Vec<String>,
    ) -> Result<()> {
        let name = employee.first_name.as_str();

        let (doc, ok) = match extract_document(self.vision.as_ref(), image, kind).await {
            Ok(doc) => (doc, true),
            Err(e) => {
                warn!(employee_id = employee.id, kind = kind.as_str(), "Document OCR failed: {}", e);
                (OcrDocument::default(), false)
            }
        };

        let project_id = match hint.as_deref().or(doc.project_name.as_deref()) {
            Some(text) => resolve_project(pool, text).await?,
            None => None,
        };
        let raw = if ok { serde_json::to_string(&doc).ok() } else { None };

        let document_id = documents::insert_document(
            pool,
            kind,
            &doc,
            DocumentMeta {
                employee_id: employee.id,
                project_id,
                image_path: Some(image_path),
                raw_ocr_json: raw.as_deref(),
                language: lang,
                status: if ok { RecordStatus::Pending } else { RecordStatus::Flagged },
                flag_reason: if ok { None } else { Some(receipts::FLAG_OCR_FAILED) },
            },
        )
        .await?;

        if !ok {
            conversation::reset_to_idle(pool, employee.id).await?;
            reply.push(msg("ocr_failed", lang, &[("name", name)]));
            return Ok(());
        }

        info!(
            employee_id = employee.id,
            document_id,
            kind = kind.as_str(),
            "Document saved, awaiting confirmation"
        );
        conversation::set_state(
            pool,
            employee.id,
            ConversationStep::AwaitingDocConfirm,
            StateTarget::Document(kind, document_id),
        )
        .await?;
        reply.push(format_document_summary(kind, &doc, name, lang));
        Ok(())
    }

    /// Flag the new receipt when it repeats an earlier one; returns whether it did
    async fn check_duplicate(
        &self,
        pool: &SqlitePool,
        employee_id: i64,
        receipt_id: i64,
        doc: &OcrDocument,
    ) -> Result<bool> {
        let (Some(vendor), Some(total), Some(date)) =
            (doc.vendor_name.as_deref(), doc.total, doc.purchase_date.as_deref())
        else {
            return Ok(false);
        };

        let Some(existing) =
            receipts::find_duplicate(pool, receipt_id, employee_id, vendor, total, date).await?
        else {
            return Ok(false);
        };

        receipts::set_status(
            pool,
            receipt_id,
            RecordStatus::Flagged,
            Some(receipts::FLAG_DUPLICATE),
        )
        .await?;
        warn!(employee_id, receipt_id, existing, "Possible duplicate receipt");
        Ok(true)
    }

    /// Write the image under a unique name: `<first>_<YYYYMMDD_HHMMSS>[_n].<ext>`
    async fn save_image(&self, first_name: &str, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.storage_path).await?;

        let stem = format!(
            "{}_{}",
            file_safe(first_name),
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let mut path = self.storage_path.join(format!("{}.{}", stem, extension));
        let mut n = 1;
        while tokio::fs::try_exists(&path).await? {
            path = self.storage_path.join(format!("{}_{}.{}", stem, n, extension));
            n += 1;
        }

        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Lowercase alphanumerics of a name, `employee` if nothing is left
fn file_safe(name: &str) -> String {
    let safe: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if safe.is_empty() {
        "employee".to_string()
    } else {
        safe
    }
}

/// Project name typed alongside a photo, without a leading "project"/"proyecto"
pub fn project_hint(body: &str) -> Option<String> {
    let text = body.trim();
    let stripped = ["project", "proyecto", "proj"]
        .iter()
        .find_map(|prefix| {
            let head = text.get(..prefix.len())?;
            let rest = &text[prefix.len()..];
            let boundary = rest.is_empty() || rest.starts_with([' ', ':', '#', '-']);
            (head.eq_ignore_ascii_case(prefix) && boundary).then_some(rest)
        })
        .unwrap_or(text)
        .trim_start_matches([' ', ':', '#', '-'])
        .trim();

    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

async fn project_name(pool: &SqlitePool, id: i64) -> Result<Option<String>> {
    let name: Option<String> = sqlx::query_scalar("SELECT name FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(name)
}
