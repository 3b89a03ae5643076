//! Phone number and contact helpers
//!
//! Twilio delivers E.164 numbers (`+14075551234`) but employee records are
//! typed in by hand, so every lookup goes through [`normalize_phone`].

/// Normalize a US phone number to E.164 (`+1XXXXXXXXXX`).
///
/// Accepts `+14075551234`, `4075551234`, `407-555-1234`, `(407) 555-1234`,
/// `1-407-555-1234`. Anything that does not reduce to 10 digits, or 11 digits
/// with a leading `1`, is returned unchanged.
///
/// # Examples
/// ```
/// use crewledger_common::phone::normalize_phone;
///
/// assert_eq!(normalize_phone("(407) 555-1234"), "+14075551234");
/// assert_eq!(normalize_phone("1-407-555-1234"), "+14075551234");
/// assert_eq!(normalize_phone("+442071838750"), "+442071838750");
/// ```
pub fn normalize_phone(phone: &str) -> String {
    let digits = digits_only(phone);
    match digits.len() {
        10 => format!("+1{}", digits),
        11 if digits.starts_with('1') => format!("+{}", digits),
        _ => phone.to_string(),
    }
}

/// Last ten digits of a number, used to match records stored without a country code
pub fn last_ten_digits(phone: &str) -> Option<String> {
    let digits = digits_only(phone);
    if digits.len() < 10 {
        return None;
    }
    Some(digits[digits.len() - 10..].to_string())
}

/// Mask a phone number for logs and employee-facing views: `***-***-1234`
pub fn mask_phone(phone: &str) -> String {
    let digits = digits_only(phone);
    if digits.is_empty() {
        return String::new();
    }
    let tail_start = digits.len().saturating_sub(4);
    format!("***-***-{}", &digits[tail_start..])
}

/// Mask an email address: `john@example.com` → `j***@example.com`
pub fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return String::new();
    };
    match local.chars().next() {
        Some(first) => format!("{}***@{}", first, domain),
        None => String::new(),
    }
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}
