use axum::http::HeaderMap;
use std::time::Duration;

/// Client identifier used when no proxy header is present
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Proxy headers consulted for the client identifier, in priority order
const CLIENT_IP_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Derive the rate limit key for a request from its proxy headers.
///
/// For `x-forwarded-for` only the first (client-most) hop is used. Empty
/// header values fall through to the next header.
pub fn client_identifier(headers: &HeaderMap) -> String {
    CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or_default().trim())
        .find(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Whole seconds a client should wait, rounded up and never zero
pub fn retry_after_secs(reset_after: Duration) -> u64 {
    let secs = reset_after.as_secs();
    let secs = if reset_after.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}

/// Domain part of an email address, for logs that must not carry the full address
pub fn email_domain(email: &str) -> &str {
    email.rsplit_once('@').map(|(_, domain)| domain).unwrap_or("")
}
