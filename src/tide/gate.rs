// =============================================================================
// Tide Gate — window membership, late band, day/window quotas
// =============================================================================
//
// Sits between the decision pipeline and the execute hub. Given the nearest
// tide extreme, the gate decides whether `now` is tradeable:
//
//   1. a nearest event must exist                     -> NO_TIDE_DATA
//   2. |tau| <= tide_window_hours (inclusive)         -> OUT_OF_TIDE_WINDOW_*
//   3. late-band filter when enabled (inclusive)      -> OUT_OF_LATE_BAND
//   4. day quota                                      -> MAX_ORDERS_PER_DAY_REACHED
//   5. per-window quota                               -> MAX_ORDERS_PER_TW_REACHED
//
// tau is signed hours since the center; window membership uses |tau|, the
// late band uses the signed value (it starts after the center).
//
// Counters are only bumped after the execute hub reports at least one opened
// account, and the bump is idempotent under the tick's operation id.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::engine_config::CounterScope;
use crate::storage::Store;
use crate::tide::provider::TideEvent;
use crate::timeutil::{hours_since, local_compact_ts, local_day_key};
use crate::types::TideKind;

/// Reason a gate check refused entry. `Display` renders the stable reason
/// codes surfaced to users and asserted by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateBlock {
    NoTideData,
    OutOfTideWindow(TideKind),
    OutOfLateBand,
    MaxOrdersPerDayReached,
    MaxOrdersPerTwReached,
}

impl std::fmt::Display for GateBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTideData => write!(f, "NO_TIDE_DATA"),
            Self::OutOfTideWindow(kind) => write!(f, "OUT_OF_TIDE_WINDOW_{kind}"),
            Self::OutOfLateBand => write!(f, "OUT_OF_LATE_BAND"),
            Self::MaxOrdersPerDayReached => write!(f, "MAX_ORDERS_PER_DAY_REACHED"),
            Self::MaxOrdersPerTwReached => write!(f, "MAX_ORDERS_PER_TW_REACHED"),
        }
    }
}

/// Gate tunables assembled per user (engine config overlaid with the user's
/// own window width and quotas).
#[derive(Debug, Clone)]
pub struct GateParams {
    pub tide_window_hours: f64,
    pub entry_late_only: bool,
    pub entry_late_from_hrs: f64,
    pub entry_late_to_hrs: f64,
    pub max_orders_per_day: u32,
    pub max_orders_per_tide_window: u32,
    pub counter_scope: CounterScope,
    pub tz_offset_hours: i32,
}

/// Quota usage snapshot returned with a passing check.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CountersSnapshot {
    pub day_used: i64,
    pub day_max: u32,
    pub tw_used: i64,
    pub tw_max: u32,
}

/// Observation of the tide relative to `now`, kept for display even when the
/// gate blocks.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TideObservation {
    pub kind: TideKind,
    pub center_ts: DateTime<Utc>,
    /// Signed hours since the center.
    pub tau_hr: f64,
    pub in_window: bool,
}

/// Result of a gate check.
#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub ok: bool,
    pub reason: Option<GateBlock>,
    pub window_id: Option<String>,
    pub counters: CountersSnapshot,
    pub tide: Option<TideObservation>,
}

impl GateOutcome {
    fn blocked(
        reason: GateBlock,
        window_id: Option<String>,
        counters: CountersSnapshot,
        tide: Option<TideObservation>,
    ) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            window_id,
            counters,
            tide,
        }
    }
}

/// Key of the day counter for `scope`.
fn day_counter_key(scope: &str, day: &str) -> String {
    format!("DAY:{scope}:{day}")
}

/// Key of the per-window counter for `scope`.
fn tw_counter_key(scope: &str, window_id: &str) -> String {
    format!("TW:{scope}:{window_id}")
}

/// Window id: local center timestamp plus tide kind, e.g.
/// "20250101T0900-HIGH".
pub fn window_id_for(event: &TideEvent, tz_offset_hours: i32) -> String {
    format!(
        "{}-{}",
        local_compact_ts(event.center_ts, tz_offset_hours),
        event.kind
    )
}

fn scope_label(scope: CounterScope, uid: Option<u64>) -> String {
    match (scope, uid) {
        (CounterScope::PerUser, Some(uid)) => uid.to_string(),
        _ => "GLOBAL".to_string(),
    }
}

/// Run the full gate check against the nearest tide event.
pub fn gate_check(
    now: DateTime<Utc>,
    nearest: Option<TideEvent>,
    store: &Store,
    params: &GateParams,
    scope_uid: Option<u64>,
) -> GateOutcome {
    let Some(event) = nearest else {
        return GateOutcome::blocked(
            GateBlock::NoTideData,
            None,
            CountersSnapshot::default(),
            None,
        );
    };

    let tau = hours_since(now, event.center_ts);
    let in_window = tau.abs() <= params.tide_window_hours;
    let window_id = window_id_for(&event, params.tz_offset_hours);
    let tide = TideObservation {
        kind: event.kind,
        center_ts: event.center_ts,
        tau_hr: (tau * 1000.0).round() / 1000.0,
        in_window,
    };

    if !in_window {
        return GateOutcome::blocked(
            GateBlock::OutOfTideWindow(event.kind),
            Some(window_id),
            CountersSnapshot::default(),
            Some(tide),
        );
    }

    if params.entry_late_only
        && !(params.entry_late_from_hrs <= tau && tau <= params.entry_late_to_hrs)
    {
        return GateOutcome::blocked(
            GateBlock::OutOfLateBand,
            Some(window_id),
            CountersSnapshot::default(),
            Some(tide),
        );
    }

    let scope = scope_label(params.counter_scope, scope_uid);
    let day = local_day_key(now, params.tz_offset_hours);

    let day_used = store.get_counter(&day_counter_key(&scope, &day));
    let tw_used = store.get_counter(&tw_counter_key(&scope, &window_id));
    let counters = CountersSnapshot {
        day_used,
        day_max: params.max_orders_per_day,
        tw_used,
        tw_max: params.max_orders_per_tide_window,
    };

    if day_used >= params.max_orders_per_day as i64 {
        return GateOutcome::blocked(
            GateBlock::MaxOrdersPerDayReached,
            Some(window_id),
            counters,
            Some(tide),
        );
    }

    if tw_used >= params.max_orders_per_tide_window as i64 {
        return GateOutcome::blocked(
            GateBlock::MaxOrdersPerTwReached,
            Some(window_id),
            counters,
            Some(tide),
        );
    }

    debug!(window_id, tau = tide.tau_hr, day_used, tw_used, "tide gate pass");
    GateOutcome {
        ok: true,
        reason: None,
        window_id: Some(window_id),
        counters,
        tide: Some(tide),
    }
}

/// Increment the day and window counters once for this execution.
///
/// Called only after the execute hub reports `opened_real`. The operation id
/// (typically `"{uid}:{m5_slot}"`) makes re-application a no-op, so a retried
/// tick can never double-count.
pub fn bump_counters_after_execute(
    store: &Store,
    window_id: &str,
    params: &GateParams,
    scope_uid: Option<u64>,
    now: DateTime<Utc>,
    op_id: &str,
) -> bool {
    let scope = scope_label(params.counter_scope, scope_uid);
    let day = local_day_key(now, params.tz_offset_hours);
    let day_key = day_counter_key(&scope, &day);
    let tw_key = tw_counter_key(&scope, window_id);
    store.incr_counters_once(op_id, &[&day_key, &tw_key])
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_store() -> Store {
        let path = std::env::temp_dir().join(format!("tideflow-gate-{}.json", uuid::Uuid::new_v4()));
        Store::open(path, 7)
    }

    fn params() -> GateParams {
        GateParams {
            tide_window_hours: 2.5,
            entry_late_only: false,
            entry_late_from_hrs: 1.0,
            entry_late_to_hrs: 2.5,
            max_orders_per_day: 8,
            max_orders_per_tide_window: 2,
            counter_scope: CounterScope::PerUser,
            tz_offset_hours: 7,
        }
    }

    // 02:00 UTC == 09:00 local (UTC+7).
    fn center() -> TideEvent {
        TideEvent {
            kind: TideKind::High,
            center_ts: Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap(),
        }
    }

    #[test]
    fn missing_event_is_no_tide_data() {
        let store = temp_store();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 30, 0).unwrap();
        let out = gate_check(now, None, &store, &params(), Some(7));
        assert!(!out.ok);
        assert_eq!(out.reason, Some(GateBlock::NoTideData));
        assert_eq!(out.reason.unwrap().to_string(), "NO_TIDE_DATA");
    }

    #[test]
    fn window_id_uses_local_time_and_kind() {
        assert_eq!(window_id_for(&center(), 7), "20250101T0900-HIGH");
    }

    #[test]
    fn inside_window_passes_with_counters() {
        let store = temp_store();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 30, 0).unwrap();
        let out = gate_check(now, Some(center()), &store, &params(), Some(7));
        assert!(out.ok);
        assert_eq!(out.window_id.as_deref(), Some("20250101T0900-HIGH"));
        assert_eq!(out.counters.day_used, 0);
        assert_eq!(out.counters.tw_used, 0);
    }

    #[test]
    fn window_edge_is_inclusive() {
        let store = temp_store();
        // Exactly +2.5h from the center.
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 4, 30, 0).unwrap();
        let out = gate_check(now, Some(center()), &store, &params(), Some(7));
        assert!(out.ok, "boundary |tau| == H must pass");

        // One minute beyond.
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 4, 31, 0).unwrap();
        let out = gate_check(now, Some(center()), &store, &params(), Some(7));
        assert_eq!(out.reason, Some(GateBlock::OutOfTideWindow(TideKind::High)));
        assert_eq!(
            out.reason.unwrap().to_string(),
            "OUT_OF_TIDE_WINDOW_HIGH"
        );
    }

    #[test]
    fn late_band_endpoints_inclusive_and_pre_center_blocked() {
        let store = temp_store();
        let mut p = params();
        p.entry_late_only = true;

        // tau = +1.0 exactly.
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();
        assert!(gate_check(now, Some(center()), &store, &p, Some(7)).ok);

        // tau = +2.5 exactly.
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 4, 30, 0).unwrap();
        assert!(gate_check(now, Some(center()), &store, &p, Some(7)).ok);

        // tau = +0.5 — inside the window but before the late band.
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 30, 0).unwrap();
        let out = gate_check(now, Some(center()), &store, &p, Some(7));
        assert_eq!(out.reason, Some(GateBlock::OutOfLateBand));

        // tau = -1.5 — pre-center never satisfies the late band.
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 30, 0).unwrap();
        let out = gate_check(now, Some(center()), &store, &p, Some(7));
        assert_eq!(out.reason, Some(GateBlock::OutOfLateBand));
    }

    #[test]
    fn window_quota_denial_leaves_counters_unchanged() {
        let store = temp_store();
        let p = params();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 30, 0).unwrap();

        // Two prior opens in this window.
        store.incr_counter("TW:7:20250101T0900-HIGH", 2);
        store.incr_counter("DAY:7:2025-01-01", 2);

        let out = gate_check(now, Some(center()), &store, &p, Some(7));
        assert!(!out.ok);
        assert_eq!(out.reason, Some(GateBlock::MaxOrdersPerTwReached));
        assert_eq!(out.counters.tw_used, 2);
        // Nothing was bumped by the failed check.
        assert_eq!(store.get_counter("TW:7:20250101T0900-HIGH"), 2);
        assert_eq!(store.get_counter("DAY:7:2025-01-01"), 2);
    }

    #[test]
    fn day_quota_denial() {
        let store = temp_store();
        let p = params();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 30, 0).unwrap();
        store.incr_counter("DAY:7:2025-01-01", 8);
        let out = gate_check(now, Some(center()), &store, &p, Some(7));
        assert_eq!(out.reason, Some(GateBlock::MaxOrdersPerDayReached));
    }

    #[test]
    fn global_scope_shares_counters_across_users() {
        let store = temp_store();
        let mut p = params();
        p.counter_scope = CounterScope::Global;
        p.max_orders_per_tide_window = 1;
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 30, 0).unwrap();

        store.incr_counter("TW:GLOBAL:20250101T0900-HIGH", 1);
        // Different users both see the shared quota exhausted.
        for uid in [7, 8] {
            let out = gate_check(now, Some(center()), &store, &p, Some(uid));
            assert_eq!(out.reason, Some(GateBlock::MaxOrdersPerTwReached));
        }
    }

    #[test]
    fn bump_is_idempotent_per_op_id() {
        let store = temp_store();
        let p = params();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 30, 0).unwrap();
        let wid = "20250101T0900-HIGH";

        assert!(bump_counters_after_execute(&store, wid, &p, Some(7), now, "7:5790240"));
        assert!(!bump_counters_after_execute(&store, wid, &p, Some(7), now, "7:5790240"));

        assert_eq!(store.get_counter("DAY:7:2025-01-01"), 1);
        assert_eq!(store.get_counter("TW:7:20250101T0900-HIGH"), 1);
    }
}
