//! Bilingual SMS message catalog (English / Spanish)
//!
//! Every reply the conversation router sends comes from here. Templates use
//! `{placeholder}` markers filled from the argument list.

use crewledger_common::db::{DocumentKind, Language};

const LANGUAGE_PROMPT: &str = "Welcome to CrewLedger! Would you like to receive messages in English or Espanol?\n\
     Bienvenido a CrewLedger! Quieres recibir mensajes en English o Espanol?";

const LANGUAGE_INVALID: &str = "I didn't catch that. Please reply with English or Espanol.\n\
     No entendi. Por favor responde English o Espanol.";

fn english(key: &str) -> Option<&'static str> {
    let text = match key {
        "language_prompt" => LANGUAGE_PROMPT,
        "language_invalid" => LANGUAGE_INVALID,
        "welcome" => "Thanks, {name}! You're all set. Send a photo of any receipt or document anytime.",
        "confirmation_question" => "Is that correct, {name}? Reply YES to save or NO to flag.",
        "confirmed" => "Saved! Thanks, {name}.",
        "rejected" => {
            "No problem, {name}. You can:\n\
             1. Send a clearer photo of the receipt\n\
             2. Text me the details: vendor, amount, date, and project name\n\n\
             What would you like to do?"
        }
        "confirm_prompt" => "{name}, just reply YES to save or NO if something looks wrong.",
        "manual_entry_prompt" => {
            "{name}, text me the receipt details: vendor, amount, date, and project name."
        }
        "manual_entry_saved" => {
            "Got it, {name}. I've saved your notes and flagged this receipt for management review. Thanks!"
        }
        "missed_receipt_prompt" => {
            "No worries, {name}. Let's log it anyway.\n\
             Please text me:\n\
             - Store name\n\
             - Approximate amount\n\
             - What you bought\n\
             - Project name\n\n\
             Example: Home Depot, about $45, roofing nails and caulk, Project Sparrow"
        }
        "missed_receipt_saved" => {
            "Got it, {name}. I've logged this as a missed receipt. It'll be reviewed at end of week. \
             Thanks for letting us know!"
        }
        "unrecognized" => {
            "Hey {name}, I didn't quite get that. To submit a receipt, text me a photo with the \
             project name. Example: [photo] Project Sparrow"
        }
        "image_download_failed" => {
            "Sorry {name}, I had trouble downloading that image. Could you try sending it again?"
        }
        "ocr_failed" => {
            "Sorry {name}, I couldn't read that clearly. Could you try taking another photo with \
             better lighting? Make sure the whole page is visible and flat."
        }
        "image_quality_warning" => {
            "Heads up: that image looks very small. I'll still process it, but a clearer photo would help."
        }
        "duplicate_warning" => {
            "Note: This looks similar to a receipt you already sent. Both copies have been saved for review."
        }
        "document_prompt" => "Is that correct, {name}? Reply YES to save this {doc} or NO to flag it.",
        "doc_confirm_prompt" => "{name}, reply YES to save this {doc} or NO if something looks wrong.",
        "document_confirmed" => "Saved! Your {doc} from {vendor} is logged. Thanks, {name}.",
        "document_rejected" => {
            "No problem, {name}. I've flagged this {doc} for management review. \
             Feel free to send a clearer photo."
        }
        _ => return None,
    };
    Some(text)
}

fn spanish(key: &str) -> Option<&'static str> {
    let text = match key {
        "language_prompt" => LANGUAGE_PROMPT,
        "language_invalid" => LANGUAGE_INVALID,
        "welcome" => {
            "Gracias, {name}! Estas listo. Envia una foto de cualquier recibo o documento en cualquier momento."
        }
        "confirmation_question" => "Es correcto, {name}? Responde SI para guardar o NO para marcarlo.",
        "confirmed" => "Guardado! Gracias, {name}.",
        "rejected" => {
            "No hay problema, {name}. Puedes:\n\
             1. Enviar una foto mas clara del recibo\n\
             2. Escribirme los detalles: proveedor, monto, fecha y nombre del proyecto\n\n\
             Que prefieres hacer?"
        }
        "confirm_prompt" => "{name}, responde SI para guardar o NO si algo no esta bien.",
        "manual_entry_prompt" => {
            "{name}, escribeme los detalles del recibo: proveedor, monto, fecha y nombre del proyecto."
        }
        "manual_entry_saved" => {
            "Entendido, {name}. He guardado tus notas y marcado este recibo para revision. Gracias!"
        }
        "missed_receipt_prompt" => {
            "No te preocupes, {name}. Vamos a registrarlo.\n\
             Escribeme:\n\
             - Nombre de la tienda\n\
             - Monto aproximado\n\
             - Que compraste\n\
             - Nombre del proyecto\n\n\
             Ejemplo: Home Depot, como $45, clavos y sellador, Proyecto Sparrow"
        }
        "missed_receipt_saved" => {
            "Listo, {name}. He registrado esto como recibo perdido. Se revisara al final de la semana. \
             Gracias por informarnos!"
        }
        "unrecognized" => {
            "Hola {name}, no entendi eso. Para enviar un recibo, mandame una foto con el nombre del \
             proyecto. Ejemplo: [foto] Proyecto Sparrow"
        }
        "image_download_failed" => {
            "Lo siento {name}, tuve problemas descargando esa imagen. Puedes intentar enviarla de nuevo?"
        }
        "ocr_failed" => {
            "Lo siento {name}, no pude leer eso claramente. Puedes intentar tomar otra foto con mejor \
             luz? Asegurate de que toda la pagina este visible y plana."
        }
        "image_quality_warning" => {
            "Aviso: esa imagen se ve muy pequena. La procesare, pero una foto mas clara ayudaria."
        }
        "duplicate_warning" => {
            "Nota: Esto parece similar a un recibo que ya enviaste. Ambas copias se guardaron para revision."
        }
        "document_prompt" => "Es correcto, {name}? Responde SI para guardar esta {doc} o NO para marcarla.",
        "doc_confirm_prompt" => "{name}, responde SI para guardar esta {doc} o NO si algo no esta bien.",
        "document_confirmed" => "Guardado! Tu {doc} de {vendor} esta registrada. Gracias, {name}.",
        "document_rejected" => {
            "No hay problema, {name}. Marque esta {doc} para revision. Puedes enviar una foto mas clara."
        }
        _ => return None,
    };
    Some(text)
}

/// Localized message for `key` with `{placeholder}` substitution
///
/// Falls back to English when the Spanish table lacks the key, and to the
/// key itself when neither table has it.
///
/// ```
/// use crewledger_common::db::Language;
/// use crewledger_server::messaging::i18n::msg;
///
/// assert_eq!(msg("confirmed", Language::En, &[("name", "Omar")]), "Saved! Thanks, Omar.");
/// assert_eq!(msg("no_such_key", Language::Es, &[]), "no_such_key");
/// ```
pub fn msg(key: &str, lang: Language, args: &[(&str, &str)]) -> String {
    let template = match lang {
        Language::En => english(key),
        Language::Es => spanish(key).or_else(|| english(key)),
    };

    let Some(template) = template else {
        return key.to_string();
    };

    args.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{}}}", name), value)
    })
}

/// Language for a stored preference code; anything unrecognized is English
pub fn lang_or_default(code: Option<&str>) -> Language {
    code.and_then(|c| c.trim().to_lowercase().parse().ok())
        .unwrap_or_default()
}

/// Human label for a document kind, used in `{doc}` placeholders
pub fn doc_label(kind: DocumentKind, lang: Language) -> &'static str {
    match (kind, lang) {
        (DocumentKind::Invoice, Language::En) => "invoice",
        (DocumentKind::Invoice, Language::Es) => "factura",
        (DocumentKind::PackingSlip, Language::En) => "packing slip",
        (DocumentKind::PackingSlip, Language::Es) => "guia de empaque",
        (DocumentKind::PurchaseOrder, Language::En) => "purchase order",
        (DocumentKind::PurchaseOrder, Language::Es) => "orden de compra",
        (_, Language::En) => "receipt",
        (_, Language::Es) => "recibo",
    }
}
