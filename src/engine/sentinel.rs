// =============================================================================
// Risk Sentinel — day-scoped lock after two stop-losses in distinct windows
// =============================================================================
//
// One record per (user, local date), persisted as a store scalar. On every
// trade close:
//
//   SL after an SL in a *different* tide window  -> streak += 1
//   SL otherwise                                 -> streak = 1
//   anything else                                -> streak = 0
//
// A streak of 2 locks the day (when auto-lock is enabled). A locked day
// short-circuits the decision pipeline until the local date rolls or an
// admin clears the record. Keying by date makes the rollover implicit: the
// next day loads a fresh record.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::Store;
use crate::timeutil::local_day_key;
use crate::types::CloseResult;

/// Streak length that trips the lock.
const LOCK_STREAK: u32 = 2;

/// Sentinel state for one local date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelDay {
    pub date: String,
    #[serde(default)]
    pub sl_streak: u32,
    #[serde(default)]
    pub last_result: Option<CloseResult>,
    #[serde(default)]
    pub last_window_key: Option<String>,
    #[serde(default)]
    pub locked: bool,
    pub last_update: DateTime<Utc>,
}

impl SentinelDay {
    fn fresh(date: String, now: DateTime<Utc>) -> Self {
        Self {
            date,
            sl_streak: 0,
            last_result: None,
            last_window_key: None,
            locked: false,
            last_update: now,
        }
    }
}

fn day_key(uid: u64, date: &str) -> String {
    format!("sentinel:{uid}:{date}")
}

/// Load the sentinel record for the user's current local date.
pub fn load_day(store: &Store, uid: u64, now: DateTime<Utc>, tz_offset_hours: i32) -> SentinelDay {
    let date = local_day_key(now, tz_offset_hours);
    store
        .get_value(&day_key(uid, &date))
        .unwrap_or_else(|| SentinelDay::fresh(date, now))
}

/// Whether the user's day is locked.
pub fn is_locked(store: &Store, uid: u64, now: DateTime<Utc>, tz_offset_hours: i32) -> bool {
    load_day(store, uid, now, tz_offset_hours).locked
}

/// Record a trade close and update the streak / lock state.
pub fn record_close(
    store: &Store,
    uid: u64,
    now: DateTime<Utc>,
    tz_offset_hours: i32,
    result: CloseResult,
    window_key: &str,
    auto_lock: bool,
) -> SentinelDay {
    let mut day = load_day(store, uid, now, tz_offset_hours);

    if result == CloseResult::Sl {
        let distinct_window = day
            .last_window_key
            .as_deref()
            .map(|w| w != window_key)
            .unwrap_or(false);
        if day.last_result == Some(CloseResult::Sl) && distinct_window {
            day.sl_streak += 1;
        } else {
            day.sl_streak = 1;
        }
    } else {
        day.sl_streak = 0;
    }

    day.last_result = Some(result);
    day.last_window_key = Some(window_key.to_string());
    day.last_update = now;

    if auto_lock && day.sl_streak >= LOCK_STREAK && !day.locked {
        day.locked = true;
        warn!(uid, date = %day.date, streak = day.sl_streak, "risk sentinel locked the day");
    }

    store.set_value(&day_key(uid, &day.date), &day);
    info!(
        uid,
        %result,
        window_key,
        streak = day.sl_streak,
        locked = day.locked,
        "sentinel close recorded"
    );
    day
}

/// Manually clear the user's current-day record (admin command).
pub fn clear(store: &Store, uid: u64, now: DateTime<Utc>, tz_offset_hours: i32) {
    let date = local_day_key(now, tz_offset_hours);
    store.set_value(&day_key(uid, &date), &SentinelDay::fresh(date.clone(), now));
    info!(uid, %date, "sentinel day cleared");
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_store() -> Store {
        let path =
            std::env::temp_dir().join(format!("tideflow-sentinel-{}.json", uuid::Uuid::new_v4()));
        Store::open(path, 7)
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn two_sl_in_distinct_windows_locks() {
        let store = temp_store();
        let d1 = record_close(&store, 7, at(1, 0), 7, CloseResult::Sl, "w1", true);
        assert_eq!(d1.sl_streak, 1);
        assert!(!d1.locked);

        let d2 = record_close(&store, 7, at(4, 0), 7, CloseResult::Sl, "w2", true);
        assert_eq!(d2.sl_streak, 2);
        assert!(d2.locked);
        assert!(is_locked(&store, 7, at(5, 0), 7));
    }

    #[test]
    fn two_sl_in_same_window_does_not_lock() {
        let store = temp_store();
        record_close(&store, 7, at(1, 0), 7, CloseResult::Sl, "w1", true);
        let d2 = record_close(&store, 7, at(2, 0), 7, CloseResult::Sl, "w1", true);
        assert_eq!(d2.sl_streak, 1);
        assert!(!d2.locked);
    }

    #[test]
    fn tp_between_sls_resets_streak() {
        let store = temp_store();
        record_close(&store, 7, at(1, 0), 7, CloseResult::Sl, "w1", true);
        record_close(&store, 7, at(2, 0), 7, CloseResult::Tp, "w2", true);
        let d3 = record_close(&store, 7, at(4, 0), 7, CloseResult::Sl, "w3", true);
        assert_eq!(d3.sl_streak, 1);
        assert!(!d3.locked);
    }

    #[test]
    fn auto_lock_disabled_keeps_day_open() {
        let store = temp_store();
        record_close(&store, 7, at(1, 0), 7, CloseResult::Sl, "w1", false);
        let d2 = record_close(&store, 7, at(4, 0), 7, CloseResult::Sl, "w2", false);
        assert_eq!(d2.sl_streak, 2);
        assert!(!d2.locked);
    }

    #[test]
    fn lock_scoped_to_local_date() {
        let store = temp_store();
        record_close(&store, 7, at(1, 0), 7, CloseResult::Sl, "w1", true);
        record_close(&store, 7, at(4, 0), 7, CloseResult::Sl, "w2", true);
        assert!(is_locked(&store, 7, at(5, 0), 7));

        // Next local day (UTC+7 rolls at 17:00 UTC) loads a fresh record.
        let next_day = Utc.with_ymd_and_hms(2025, 1, 1, 18, 0, 0).unwrap();
        assert!(!is_locked(&store, 7, next_day, 7));
    }

    #[test]
    fn manual_clear_unlocks() {
        let store = temp_store();
        record_close(&store, 7, at(1, 0), 7, CloseResult::Sl, "w1", true);
        record_close(&store, 7, at(4, 0), 7, CloseResult::Sl, "w2", true);
        assert!(is_locked(&store, 7, at(5, 0), 7));

        clear(&store, 7, at(5, 0), 7);
        assert!(!is_locked(&store, 7, at(5, 0), 7));
        assert_eq!(load_day(&store, 7, at(5, 0), 7).sl_streak, 0);
    }

    #[test]
    fn users_are_independent() {
        let store = temp_store();
        record_close(&store, 7, at(1, 0), 7, CloseResult::Sl, "w1", true);
        record_close(&store, 7, at(4, 0), 7, CloseResult::Sl, "w2", true);
        assert!(is_locked(&store, 7, at(5, 0), 7));
        assert!(!is_locked(&store, 8, at(5, 0), 7));
    }
}
