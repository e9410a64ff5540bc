use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shopsync_common::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCursor {
    pub shop_id: String,
    pub platform: Platform,
    /// Opaque watermark: an RFC 3339 timestamp, a `YYYY-MM-DD` date, or a
    /// platform cursor token.
    pub watermark: serde_json::Value,
    pub last_success_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCursor {
    pub fn watermark_str(&self) -> Option<&str> {
        self.watermark.as_str()
    }

    /// Watermark interpreted as an instant. Dates are taken at midnight UTC.
    pub fn watermark_time(&self) -> Option<DateTime<Utc>> {
        self.watermark_str().and_then(parse_instant)
    }
}

/// `true` when `candidate` may replace `current` without moving the watermark
/// backwards. Timestamps and dates compare chronologically, other strings
/// lexicographically; non-string watermarks always replace.
pub fn watermark_advances(current: &serde_json::Value, candidate: &serde_json::Value) -> bool {
    match (current.as_str(), candidate.as_str()) {
        (Some(cur), Some(cand)) => match (parse_instant(cur), parse_instant(cand)) {
            (Some(c), Some(n)) => n >= c,
            _ => cand >= cur,
        },
        _ => true,
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_timestamp_advances() {
        assert!(watermark_advances(
            &json!("2024-05-01T10:00:00Z"),
            &json!("2024-05-01T10:00:01Z")
        ));
        assert!(!watermark_advances(
            &json!("2024-05-01T10:00:00Z"),
            &json!("2024-04-30T23:59:59Z")
        ));
    }

    #[test]
    fn equal_watermark_is_accepted() {
        assert!(watermark_advances(&json!("2024-05-01"), &json!("2024-05-01")));
    }

    #[test]
    fn offsets_compare_chronologically() {
        // 12:00+02:00 is 10:00Z, so it is behind 11:00Z.
        assert!(!watermark_advances(
            &json!("2024-05-01T11:00:00Z"),
            &json!("2024-05-01T12:00:00+02:00")
        ));
    }

    #[test]
    fn dates_compare_chronologically() {
        assert!(watermark_advances(&json!("2024-05-01"), &json!("2024-05-02")));
        assert!(!watermark_advances(&json!("2024-05-02"), &json!("2024-05-01")));
    }

    #[test]
    fn opaque_tokens_fall_back_to_string_order() {
        assert!(watermark_advances(&json!("cursor-a"), &json!("cursor-b")));
        assert!(!watermark_advances(&json!("cursor-b"), &json!("cursor-a")));
    }

    #[test]
    fn non_string_watermark_always_replaces() {
        assert!(watermark_advances(&json!({"page": 3}), &json!({"page": 1})));
        assert!(watermark_advances(&json!(null), &json!("2024-01-01")));
    }

    #[test]
    fn watermark_time_parses_dates_and_timestamps() {
        let cursor = SyncCursor {
            shop_id: "acme".into(),
            platform: Platform::Meta,
            watermark: json!("2024-05-01"),
            last_success_at: None,
            updated_at: Utc::now(),
        };
        assert_eq!(
            cursor.watermark_time().unwrap().to_rfc3339(),
            "2024-05-01T00:00:00+00:00"
        );
    }
}
