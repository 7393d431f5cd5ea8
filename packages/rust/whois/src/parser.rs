//! Registry expiry extraction from raw WHOIS responses.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

/// Output format of every normalized expiry value.
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// First `Registry Expiry Date:` field, value captured to end of line.
static EXPIRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Registry Expiry Date:[ \t]*([^\r\n]*)").expect("expiry regex")
});

/// Naive layouts tried when the value is not RFC 3339.
const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

/// Find the registry expiry in a WHOIS response, normalized to
/// `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// Returns `None` when the field is absent or its value is not a date; both
/// are normal outcomes, not errors.
pub fn extract_expiry(response: &str) -> Option<String> {
    let raw = EXPIRY_RE.captures(response)?.get(1)?.as_str();
    let normalized = normalize_expiry(raw);
    if normalized.is_none() {
        tracing::debug!(value = raw, "unrecognized expiry value");
    }
    normalized
}

/// Normalize a single expiry value, e.g. `2025-06-01T00:00:00Z` → `2025-06-01 00:00:00`.
pub fn normalize_expiry(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).format(EXPIRY_FORMAT).to_string());
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(dt.format(EXPIRY_FORMAT).to_string());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(EXPIRY_FORMAT).to_string())
}
