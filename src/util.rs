use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
pub(crate) fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Return the trimmed payload of a `data:` line, or `None` for any other line
/// (comments, `event:` lines, blank keep-alives).
#[inline]
pub(crate) fn sse_data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let payload = trimmed.strip_prefix("data:")?;
    Some(payload.trim())
}

/// Like [`sse_data_payload`] but also accepts a bare JSON line, for NDJSON
/// providers that can optionally be switched to SSE framing.
#[inline]
pub(crate) fn ndjson_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') || trimmed.starts_with("event:") {
        return None;
    }
    Some(
        trimmed
            .strip_prefix("data:")
            .map_or(trimmed, str::trim),
    )
}

/// Shorten `text` to at most `max` bytes on a char boundary, for log fields.
#[inline]
pub(crate) fn truncate_for_log(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_data_payload() {
        assert_eq!(sse_data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data_payload("data:[DONE]\r"), Some("[DONE]"));
        assert_eq!(sse_data_payload("  data:  x  "), Some("x"));
        assert_eq!(sse_data_payload(": keep-alive"), None);
        assert_eq!(sse_data_payload("event: ping"), None);
        assert_eq!(sse_data_payload(""), None);
    }

    #[test]
    fn test_ndjson_payload() {
        assert_eq!(ndjson_payload("{\"done\":true}"), Some("{\"done\":true}"));
        assert_eq!(ndjson_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(ndjson_payload("   "), None);
        assert_eq!(ndjson_payload("event: message"), None);
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        assert_eq!(truncate_for_log("hello", 10), "hello");
        assert_eq!(truncate_for_log("héllo", 2), "h");
        assert_eq!(truncate_for_log("héllo", 3), "hé");
    }
}
