use chrono::{DateTime, Utc};

/// Parse a feed timestamp.
///
/// Accepts RFC 2822/1123 (`Sat, 29 Jun 2013 18:20:00 GMT`, `+0000` offsets)
/// and RFC 3339 (`2015-03-03T21:29:00+00:00`). Anything else is `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
