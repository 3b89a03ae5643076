//! TwiML replies for the SMS webhook

/// Escape text for an XML text node
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// TwiML document carrying `reply`, or an empty response when there is nothing to send
pub fn twiml_response(reply: Option<&str>) -> String {
    match reply {
        Some(text) => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Response><Message>{}</Message></Response>"#,
            escape_xml(text)
        ),
        None => r#"<?xml version="1.0" encoding="UTF-8"?><Response/>"#.to_string(),
    }
}
