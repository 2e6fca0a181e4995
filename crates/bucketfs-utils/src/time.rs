//! Second-resolution time helpers and HTTP date formatting.

use chrono::{DateTime, TimeZone, Utc};

/// The current time as UNIX seconds.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Format UNIX seconds as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`)
/// for conditional request headers.
pub fn secs_to_http_date(secs: i64) -> String {
    let dt = Utc
        .timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date back into UNIX seconds.
pub fn http_date_to_secs(date: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(date)
        .ok()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_date_round_trip() {
        let secs = 784_111_777; // Sun, 06 Nov 1994 08:49:37 GMT
        let formatted = secs_to_http_date(secs);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(http_date_to_secs(&formatted), Some(secs));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(http_date_to_secs("not a date"), None);
    }
}
