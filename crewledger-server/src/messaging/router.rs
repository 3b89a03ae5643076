//! SMS conversation router
//!
//! Each employee has one conversation step. An inbound message is resolved
//! to its sender, dispatched on that step, and answered with a reply body
//! (or nothing, for senders we do not reply to).
//!
//! ```text
//! (no language) ──► awaiting_language ──► idle
//! idle + photo  ──► awaiting_confirmation ──YES──► idle
//!                                          └─NO──► awaiting_manual_entry ──► idle
//! idle + photo of invoice/slip/PO ──► awaiting_doc_confirm ──► idle
//! idle + "lost my receipt" ──► awaiting_missed_details ──► idle
//! ```

use crewledger_common::db::{ConversationStep, DocumentKind, Employee, Language, RecordStatus};
use crewledger_common::phone::mask_phone;
use crewledger_common::Result;
use regex::Regex;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::db::{conversation, documents, employees, receipts, ConversationState, StateTarget};
use crate::db::receipts::NewReceipt;
use crate::messaging::i18n::{doc_label, msg};
use crate::messaging::intake::Intake;

const AFFIRMATIVE: &[&str] = &["YES", "Y", "YEP", "YEAH", "CORRECT", "LOOKS GOOD", "GOOD", "SI", "SÍ"];
const NEGATIVE: &[&str] = &["NO", "N", "NOPE", "WRONG", "INCORRECT"];

const ENGLISH_REPLIES: &[&str] = &["english", "eng", "en", "ingles", "inglés"];
const SPANISH_REPLIES: &[&str] = &["espanol", "español", "spanish", "esp", "es", "spa"];

const MISSED_RECEIPT_PATTERN: &str = r"(?i)(didn['’]?t get a receipt|no receipt|lost.{0,10}receipt|forgot.{0,10}receipt|never got.{0,10}receipt)";

/// One MMS attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMedia {
    pub url: String,
    pub content_type: String,
}

/// An inbound SMS/MMS as delivered by the gateway webhook
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
    pub media: Vec<InboundMedia>,
    pub message_sid: Option<String>,
    pub to: Option<String>,
}

impl InboundMessage {
    /// Build from webhook form fields (`From`, `Body`, `NumMedia`, `MediaUrl0`, ...)
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let num_media = params
            .get("NumMedia")
            .and_then(|n| n.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let media = (0..num_media)
            .filter_map(|i| {
                let url = params.get(&format!("MediaUrl{}", i))?.trim();
                if url.is_empty() {
                    return None;
                }
                Some(InboundMedia {
                    url: url.to_string(),
                    content_type: params
                        .get(&format!("MediaContentType{}", i))
                        .cloned()
                        .unwrap_or_default(),
                })
            })
            .collect();

        Self {
            from: params.get("From").cloned().unwrap_or_default(),
            body: params
                .get("Body")
                .map(|b| b.trim().to_string())
                .unwrap_or_default(),
            media,
            message_sid: params.get("MessageSid").cloned(),
            to: params.get("To").cloned(),
        }
    }
}

/// Reply token as matched against YES/NO sets
fn normalize_token(text: &str) -> String {
    text.trim()
        .to_uppercase()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_string()
}

pub fn is_affirmative(text: &str) -> bool {
    AFFIRMATIVE.contains(&normalize_token(text).as_str())
}

pub fn is_negative(text: &str) -> bool {
    NEGATIVE.contains(&normalize_token(text).as_str())
}

/// Language named in a reply to the language prompt
pub fn parse_language_reply(text: &str) -> Option<Language> {
    let reply = text.trim().trim_end_matches(['.', '!']).trim().to_lowercase();
    if ENGLISH_REPLIES.contains(&reply.as_str()) {
        Some(Language::En)
    } else if SPANISH_REPLIES.contains(&reply.as_str()) {
        Some(Language::Es)
    } else {
        None
    }
}

/// Whether the text reports a purchase without a receipt
pub fn is_missed_receipt(text: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(MISSED_RECEIPT_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

/// Handle one inbound message and return the reply body
///
/// `None` means send nothing: the sender is unknown or inactive.
pub async fn route_message(
    pool: &SqlitePool,
    intake: &Intake,
    inbound: &InboundMessage,
) -> Result<Option<String>> {
    let Some(employee) = employees::find_by_phone(pool, &inbound.from).await? else {
        employees::record_unknown_contact(pool, &inbound.from, &inbound.body, !inbound.media.is_empty())
            .await?;
        return Ok(None);
    };

    if !employee.is_active {
        info!(
            employee_id = employee.id,
            "Ignoring message from inactive employee {}",
            mask_phone(&employee.phone_number)
        );
        return Ok(None);
    }

    info!(
        employee_id = employee.id,
        media = inbound.media.len(),
        "Inbound message from {}",
        mask_phone(&employee.phone_number)
    );

    let state = conversation::current_state(pool, employee.id).await?;

    if state.step == ConversationStep::AwaitingLanguage {
        return handle_language_reply(pool, &employee, &inbound.body).await.map(Some);
    }

    let Some(lang) = employee.language() else {
        conversation::set_state(
            pool,
            employee.id,
            ConversationStep::AwaitingLanguage,
            StateTarget::None,
        )
        .await?;
        return Ok(Some(msg("language_prompt", Language::En, &[])));
    };

    let reply = dispatch(pool, intake, &employee, lang, &state, inbound).await?;
    Ok(Some(reply))
}

/// Attachments only start intake from `idle`; a pending question is answered
/// from the message text first.
async fn dispatch(
    pool: &SqlitePool,
    intake: &Intake,
    employee: &Employee,
    lang: Language,
    state: &ConversationState,
    inbound: &InboundMessage,
) -> Result<String> {
    let name = employee.first_name.as_str();
    let body = inbound.body.as_str();
    if state.step != ConversationStep::Idle && !inbound.media.is_empty() {
        debug!(
            employee_id = employee.id,
            state = state.step.as_str(),
            "Attachment received while awaiting a reply"
        );
    }

    match (state.step, state.target) {
        (ConversationStep::AwaitingConfirmation, StateTarget::Receipt(id))
            if receipts::receipt_exists(pool, id).await? =>
        {
            if is_affirmative(body) {
                if receipts::is_flagged_duplicate(pool, id).await? {
                    info!(
                        employee_id = employee.id,
                        receipt_id = id,
                        "Possible duplicate accepted by employee, left flagged for review"
                    );
                } else {
                    receipts::set_status(pool, id, RecordStatus::Confirmed, None).await?;
                    info!(employee_id = employee.id, receipt_id = id, "Receipt confirmed");
                }
                conversation::reset_to_idle(pool, employee.id).await?;
                Ok(msg("confirmed", lang, &[("name", name)]))
            } else if is_negative(body) {
                receipts::set_status(
                    pool,
                    id,
                    RecordStatus::Flagged,
                    Some(receipts::FLAG_EMPLOYEE_REJECTED),
                )
                .await?;
                conversation::set_state(
                    pool,
                    employee.id,
                    ConversationStep::AwaitingManualEntry,
                    StateTarget::Receipt(id),
                )
                .await?;
                info!(employee_id = employee.id, receipt_id = id, "Receipt rejected by employee");
                Ok(msg("rejected", lang, &[("name", name)]))
            } else {
                Ok(msg("confirm_prompt", lang, &[("name", name)]))
            }
        }

        (ConversationStep::AwaitingManualEntry, StateTarget::Receipt(id))
            if receipts::receipt_exists(pool, id).await? =>
        {
            if body.is_empty() {
                return Ok(msg("manual_entry_prompt", lang, &[("name", name)]));
            }
            receipts::save_note(pool, id, body, receipts::FLAG_MANUAL_ENTRY).await?;
            conversation::reset_to_idle(pool, employee.id).await?;
            info!(employee_id = employee.id, receipt_id = id, "Manual entry saved");
            Ok(msg("manual_entry_saved", lang, &[("name", name)]))
        }

        (ConversationStep::AwaitingMissedDetails, StateTarget::Receipt(id))
            if receipts::receipt_exists(pool, id).await? =>
        {
            if body.is_empty() {
                return Ok(msg("missed_receipt_prompt", lang, &[("name", name)]));
            }
            receipts::save_note(pool, id, body, receipts::FLAG_MISSED_DETAILS).await?;
            conversation::reset_to_idle(pool, employee.id).await?;
            info!(employee_id = employee.id, receipt_id = id, "Missed receipt details saved");
            Ok(msg("missed_receipt_saved", lang, &[("name", name)]))
        }

        (ConversationStep::AwaitingDocConfirm, StateTarget::Document(kind, id)) => {
            match documents::document_vendor(pool, kind, id).await? {
                Some(vendor) => {
                    handle_doc_confirm(pool, employee, lang, kind, id, vendor, body).await
                }
                None => {
                    stale_state(pool, employee, state).await?;
                    handle_idle(pool, intake, employee, lang, inbound).await
                }
            }
        }

        (ConversationStep::Idle, _) => handle_idle(pool, intake, employee, lang, inbound).await,

        _ => {
            stale_state(pool, employee, state).await?;
            handle_idle(pool, intake, employee, lang, inbound).await
        }
    }
}

async fn stale_state(pool: &SqlitePool, employee: &Employee, state: &ConversationState) -> Result<()> {
    warn!(
        employee_id = employee.id,
        state = state.step.as_str(),
        "Conversation state points at a missing record, resetting to idle"
    );
    conversation::reset_to_idle(pool, employee.id).await
}

async fn handle_language_reply(pool: &SqlitePool, employee: &Employee, body: &str) -> Result<String> {
    let Some(lang) = parse_language_reply(body) else {
        return Ok(msg("language_invalid", Language::En, &[]));
    };

    employees::set_language(pool, employee.id, lang).await?;
    conversation::reset_to_idle(pool, employee.id).await?;
    info!(employee_id = employee.id, language = lang.as_str(), "Language preference saved");
    Ok(msg("welcome", lang, &[("name", &employee.first_name)]))
}

async fn handle_idle(
    pool: &SqlitePool,
    intake: &Intake,
    employee: &Employee,
    lang: Language,
    inbound: &InboundMessage,
) -> Result<String> {
    let name = employee.first_name.as_str();
    let body = inbound.body.as_str();

    if let Some(media) = inbound.media.first() {
        if inbound.media.len() > 1 {
            info!(
                employee_id = employee.id,
                ignored = inbound.media.len() - 1,
                "Only the first attachment is processed"
            );
        }
        return intake.process(pool, employee, lang, media, body).await;
    }

    if !is_missed_receipt(body) {
        return Ok(msg("unrecognized", lang, &[("name", name)]));
    }

    let receipt_id = receipts::insert_receipt(
        pool,
        &NewReceipt {
            employee_id: employee.id,
            matched_project_name: Some(body.to_string()),
            status: RecordStatus::Flagged,
            flag_reason: Some(receipts::FLAG_MISSED.to_string()),
            is_missed_receipt: true,
            ..Default::default()
        },
    )
    .await?;
    conversation::set_state(
        pool,
        employee.id,
        ConversationStep::AwaitingMissedDetails,
        StateTarget::Receipt(receipt_id),
    )
    .await?;
    info!(employee_id = employee.id, receipt_id, "Missed receipt placeholder created");
    Ok(msg("missed_receipt_prompt", lang, &[("name", name)]))
}

async fn handle_doc_confirm(
    pool: &SqlitePool,
    employee: &Employee,
    lang: Language,
    kind: DocumentKind,
    id: i64,
    vendor: Option<String>,
    body: &str,
) -> Result<String> {
    let name = employee.first_name.as_str();
    let label = doc_label(kind, lang);

    if is_affirmative(body) {
        documents::set_document_status(pool, kind, id, RecordStatus::Confirmed, None).await?;
        conversation::reset_to_idle(pool, employee.id).await?;
        info!(employee_id = employee.id, document_id = id, kind = kind.as_str(), "Document confirmed");
        let vendor = vendor.unwrap_or_else(|| "Unknown vendor".to_string());
        Ok(msg(
            "document_confirmed",
            lang,
            &[("name", name), ("doc", label), ("vendor", &vendor)],
        ))
    } else if is_negative(body) {
        documents::set_document_status(
            pool,
            kind,
            id,
            RecordStatus::Flagged,
            Some(receipts::FLAG_EMPLOYEE_REJECTED),
        )
        .await?;
        conversation::reset_to_idle(pool, employee.id).await?;
        info!(employee_id = employee.id, document_id = id, kind = kind.as_str(), "Document rejected");
        Ok(msg("document_rejected", lang, &[("name", name), ("doc", label)]))
    } else {
        Ok(msg("doc_confirm_prompt", lang, &[("name", name), ("doc", label)]))
    }
}
