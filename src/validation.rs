//! Sanitizing and validating submitted contact details.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum characters kept from any submitted field
pub const MAX_INPUT_CHARS: usize = 500;

/// Maximum length of a valid email address
pub const MAX_EMAIL_LEN: usize = 254;

/// Inclusive bounds on the number of digits in a phone number
pub const MIN_PHONE_DIGITS: usize = 7;
pub const MAX_PHONE_DIGITS: usize = 15;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern is valid")
});

// Digits, whitespace and the usual formatting punctuation.
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9\s\-()+.]{7,20}$").expect("phone pattern is valid"));

/// Trim surrounding whitespace and cap the field length.
pub fn sanitize_input(input: &str) -> String {
    input.trim().chars().take(MAX_INPUT_CHARS).collect()
}

/// Lowercased, trimmed form of an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> bool {
    let normalized = normalize_email(email);
    !normalized.is_empty()
        && normalized.len() <= MAX_EMAIL_LEN
        && EMAIL_PATTERN.is_match(&normalized)
}

/// A phone number is valid when it carries 7-15 digits and otherwise only
/// contains formatting characters.
pub fn validate_phone(phone: &str) -> bool {
    let trimmed = phone.trim();
    if trimmed.is_empty() {
        return false;
    }

    let digits = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits) && PHONE_PATTERN.is_match(trimmed)
}
