// =============================================================================
// Time helpers — local day keys, M5 slots, tide-relative offsets
// =============================================================================
//
// All engine timestamps are UTC instants; the local fixed offset is applied
// only when rendering day keys and window ids. Durations are computed by
// instant subtraction, never by naive local arithmetic.
// =============================================================================

use chrono::{DateTime, FixedOffset, Utc};

/// Seconds in one M5 bar.
pub const M5_SECS: i64 = 300;

/// Fixed offset for the configured local timezone.
///
/// Falls back to UTC if the offset is out of chrono's accepted range, which
/// cannot happen for any sane configuration value.
pub fn local_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

/// Local calendar day key, e.g. "2025-01-01".
pub fn local_day_key(now: DateTime<Utc>, tz_offset_hours: i32) -> String {
    now.with_timezone(&local_offset(tz_offset_hours))
        .format("%Y-%m-%d")
        .to_string()
}

/// Compact local timestamp used inside window ids, e.g. "20250101T0900".
pub fn local_compact_ts(ts: DateTime<Utc>, tz_offset_hours: i32) -> String {
    ts.with_timezone(&local_offset(tz_offset_hours))
        .format("%Y%m%dT%H%M")
        .to_string()
}

/// Integer id of the 5-minute slot containing `now`.
pub fn m5_slot(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(M5_SECS)
}

/// Seconds elapsed since the most recent 5-minute boundary.
pub fn secs_since_m5_close(now: DateTime<Utc>) -> i64 {
    now.timestamp().rem_euclid(M5_SECS)
}

/// Signed hours from `center` to `now` (positive after the center).
pub fn hours_since(now: DateTime<Utc>, center: DateTime<Utc>) -> f64 {
    (now - center).num_milliseconds() as f64 / 3_600_000.0
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_key_respects_offset() {
        // 2025-01-01 20:00 UTC is already Jan 2 at UTC+7.
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap();
        assert_eq!(local_day_key(now, 7), "2025-01-02");
        assert_eq!(local_day_key(now, 0), "2025-01-01");
    }

    #[test]
    fn compact_ts_formats_local_minutes() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap();
        assert_eq!(local_compact_ts(ts, 7), "20250101T0900");
    }

    #[test]
    fn m5_slot_is_stable_within_a_bar() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 4, 59).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        assert_eq!(m5_slot(t0), m5_slot(t1));
        assert_eq!(m5_slot(t2), m5_slot(t0) + 1);
    }

    #[test]
    fn secs_since_close_boundaries() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        assert_eq!(secs_since_m5_close(t0), 0);
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 6, 30).unwrap();
        assert_eq!(secs_since_m5_close(t1), 90);
    }

    #[test]
    fn hours_since_is_signed() {
        let center = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 10, 30, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        assert!((hours_since(after, center) - 1.5).abs() < 1e-9);
        assert!((hours_since(before, center) + 1.0).abs() < 1e-9);
    }
}
