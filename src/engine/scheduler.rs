// =============================================================================
// Scheduler — tick loops and the A -> (T) -> B -> C flow
// =============================================================================
//
// The main loop wakes every `scheduler_tick_sec` seconds and processes every
// known user: decision pass, mode routing, TP monitor, pending-TTL sweep.
// Per-user work is serialized through the user's async lock; a tick that
// finds the previous one still running skips rather than queueing. A user's
// failure never halts the loop.
//
// The entry flow below is the single path from a passing decision to an open
// position. It is shared by the auto route and the manual-approval route:
// gate check, multi-account execution, idempotent counter bump, bookkeeping,
// broadcast — persisted strictly in that order.
//
// A second loop serves the M30/H4 reports at nine anchors around each tide
// center (center + k*30min, k in -4..=4) with a grace tolerance, de-duped
// per anchor.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::engine::approval;
use crate::engine::decision::{evaluate_tick, Decision};
use crate::engine::executor::EntryRequest;
use crate::engine::monitor::check_tp_monitor;
use crate::engine::{EngineState, OpenPosition};
use crate::engine_config::EngineConfig;
use crate::notify::format_entry_confirmation;
use crate::storage::{LastEntryMeta, UserSettings};
use crate::tide::gate::{bump_counters_after_execute, gate_check, GateBlock, GateParams};
use crate::tide::provider::TideEvent;
use crate::timeutil::local_day_key;
use crate::types::{Side, TradeMode};

/// Report anchors around each tide center: center + k*30min.
const REPORT_ANCHOR_RANGE: std::ops::RangeInclusive<i64> = -4..=4;
/// Period of the report loop.
const REPORT_LOOP_TICK_SEC: u64 = 10;

/// Gate tunables for one user: engine config overlaid with the user's own
/// window width and quotas.
pub fn gate_params(cfg: &EngineConfig, settings: &UserSettings) -> GateParams {
    GateParams {
        tide_window_hours: settings.tide_window_hours,
        entry_late_only: cfg.entry_late_only,
        entry_late_from_hrs: cfg.entry_late_from_hrs,
        entry_late_to_hrs: cfg.entry_late_to_hrs,
        max_orders_per_day: settings.max_orders_per_day,
        max_orders_per_tide_window: settings.max_orders_per_tide_window,
        counter_scope: cfg.counter_scope,
        tz_offset_hours: cfg.local_tz_offset_hours,
    }
}

/// Outcome of the shared entry flow.
#[derive(Debug)]
pub enum FlowResult {
    GateBlocked(GateBlock),
    NotOpened,
    Opened { window_id: String },
}

/// Gate, execute, bump, bookkeep, broadcast — the one path to a position.
#[allow(clippy::too_many_arguments)]
pub async fn execute_entry_flow(
    state: &EngineState,
    uid: u64,
    signal: Side,
    confidence: i64,
    report_text: &str,
    tide: Option<TideEvent>,
    price_ref: f64,
    op_id: &str,
    now: DateTime<Utc>,
) -> FlowResult {
    let cfg = state.config.read().clone();
    let user = state.store.get_user(uid, now);
    let params = gate_params(&cfg, &user.settings);

    // ── (T) Tide gate ────────────────────────────────────────────────────
    let gate = gate_check(now, tide, &state.store, &params, Some(uid));
    if !gate.ok {
        let reason = gate.reason.expect("failed gate carries a reason");
        info!(uid, %reason, "entry refused by tide gate");
        state
            .notifier
            .send(uid, &format!("⛔ entry blocked: {reason}\n{report_text}"))
            .await;
        return FlowResult::GateBlocked(reason);
    }
    let window_id = gate
        .window_id
        .clone()
        .expect("passing gate carries a window id");

    // ── (B) Execute hub ──────────────────────────────────────────────────
    let request = EntryRequest {
        pair: user.settings.pair.clone(),
        side: signal,
        reference_price: price_ref,
        balance: user.settings.balance,
        risk_percent: user.settings.risk_percent,
        leverage: user.settings.leverage,
    };
    let outcome = state.hub.execute(&request, &cfg.executor).await;

    if !outcome.opened_real {
        let errors: Vec<String> = outcome
            .per_account
            .iter()
            .filter_map(|f| f.error.clone())
            .collect();
        warn!(uid, ?errors, "no account opened — no counters, no position");
        state
            .notifier
            .send(
                uid,
                &format!("⚠️ execution failed on every account: {}", errors.join("; ")),
            )
            .await;
        return FlowResult::NotOpened;
    }

    // ── Counter bump (idempotent, only after opened_real) ────────────────
    bump_counters_after_execute(&state.store, &window_id, &params, Some(uid), now, op_id);

    // ── Bookkeeping ──────────────────────────────────────────────────────
    let mut user = state.store.get_user(uid, now);
    user.today.count += 1;
    *user
        .tide_window_trades
        .entry(window_id.clone())
        .or_insert(0) += 1;
    user.last_entry = Some(LastEntryMeta {
        at: now,
        price: price_ref,
        side: signal,
        window_key: window_id.clone(),
    });
    user.history.push(serde_json::json!({
        "at": now.to_rfc3339(),
        "side": signal.to_string(),
        "price": price_ref,
        "confidence": confidence,
        "window": window_id,
        "accounts": outcome.entry_ids.clone(),
    }));
    let settings = user.settings.clone();
    state.store.put_user(uid, user);

    let position = OpenPosition {
        pair: settings.pair.clone(),
        side: signal,
        qty: outcome.qty_total,
        entry_price: price_ref,
        entry_time: now,
        tide_center: tide.map(|t| t.center_ts),
        sl_price: outcome.sl,
        tp_price: outcome.tp,
        simulated: outcome.per_account.iter().filter(|f| f.opened).all(|f| f.simulated),
        window_key: window_id.clone(),
        source_accounts: outcome
            .per_account
            .iter()
            .filter(|f| f.opened)
            .map(|f| f.account.clone())
            .collect(),
    };
    state.set_open_position(uid, position.clone());

    // ── (C) Broadcast ────────────────────────────────────────────────────
    let deadline = position.tp_deadline(cfg.tp_time_hours);
    let text = format_entry_confirmation(
        &settings.pair,
        signal,
        settings.leverage,
        &outcome,
        deadline,
        &gate.counters,
        &window_id,
        report_text,
    );
    state.notifier.send(uid, &text).await;

    info!(uid, %signal, window_id, qty = outcome.qty_total, "entry flow complete");
    FlowResult::Opened { window_id }
}

/// One user's full tick: decision, mode routing, monitor, TTL sweep.
pub async fn run_user_tick(state: &EngineState, uid: u64, now: DateTime<Utc>) {
    match evaluate_tick(state, uid, now).await {
        Decision::Skip { reason, detail } => {
            debug!(uid, %reason, detail, "decision skip");
            // The lock notice goes out once per local date.
            if reason == crate::engine::decision::SkipReason::LockedToday {
                let cfg_tz = state.config.read().local_tz_offset_hours;
                let today = local_day_key(now, cfg_tz);
                let first = {
                    let mut notified = state.lock_notified_date.write();
                    notified.insert(uid, today.clone()) != Some(today)
                };
                if first {
                    state
                        .notifier
                        .send(uid, "🔒 trading locked for today (two stop-losses)")
                        .await;
                }
            }
        }
        Decision::Go(go) => {
            info!(
                uid,
                signal = %go.signal,
                confidence = go.confidence,
                h4 = ?go.frames.h4.side,
                m30 = ?go.frames.m30.side,
                tau_hr = ?go.tau_hr,
                in_late = go.in_late,
                "decision pass"
            );
            let user = state.store.get_user(uid, now);
            match user.settings.mode {
                TradeMode::Auto => {
                    let op_id = format!("{uid}:{}", go.slot);
                    execute_entry_flow(
                        state,
                        uid,
                        go.signal,
                        go.confidence,
                        &go.text,
                        go.tide,
                        go.price_ref,
                        &op_id,
                        now,
                    )
                    .await;
                }
                TradeMode::Manual => {
                    if approval::has_active_pending(state, uid, now) {
                        debug!(uid, "active pending — not creating another");
                    } else {
                        let pending = approval::create_pending(state, uid, &go, now);
                        state
                            .notifier
                            .send(uid, &approval::pending_notice(&pending))
                            .await;
                    }
                }
            }
        }
    }

    check_tp_monitor(state, uid, now).await;
    approval::sweep_expired(state, uid, now).await;
}

/// The main loop. Never returns; spawn it.
pub async fn run_scheduler(state: Arc<EngineState>) {
    let tick_sec = state.config.read().scheduler_tick_sec.max(1);
    info!(tick_sec, "scheduler started");

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(tick_sec));
    loop {
        ticker.tick().await;
        let now = Utc::now();

        for uid in state.store.user_ids() {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let lock = state.user_lock(uid);
                // Serialize per user; a still-running tick wins.
                let Ok(_guard) = lock.try_lock() else {
                    debug!(uid, "previous tick still running — skipping");
                    return;
                };
                run_user_tick(&state, uid, now).await;
            });
        }
    }
}

/// The M30/H4 report loop: nine anchors around each tide center, per user
/// with reports enabled, de-duped per (user, anchor).
pub async fn run_report_loop(state: Arc<EngineState>) {
    info!("report loop started");
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(REPORT_LOOP_TICK_SEC));

    loop {
        ticker.tick().await;
        let now = Utc::now();
        let grace = state.config.read().m30_slot_grace_sec as i64;

        let event = match state.provider.nearest_event(now).await {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "report loop tide lookup failed");
                continue;
            }
        };

        let due_anchor = REPORT_ANCHOR_RANGE
            .clone()
            .map(|k| event.center_ts + chrono::Duration::minutes(30 * k))
            .find(|anchor| (now - *anchor).num_seconds().abs() <= grace);
        let Some(anchor) = due_anchor else {
            continue;
        };

        for uid in state.store.user_ids() {
            let user = state.store.get_user(uid, now);
            if !user.settings.m5_report_enabled {
                continue;
            }
            if !state.report_sent.write().insert((uid, anchor.timestamp())) {
                continue;
            }

            let cfg = state.config.read().clone();
            let eval = state.scorer.evaluate(&cfg, &user.settings.pair, now).await;
            let header = format!(
                "📊 report anchor {} (center {})",
                anchor.format("%H:%M"),
                event.center_ts.format("%H:%M")
            );
            state
                .notifier
                .send(uid, &format!("{header}\n{}", eval.text))
                .await;
        }
    }
}

/// Supervisor wrapper: log and restart a loop that somehow returns.
pub fn spawn_supervised<F, Fut>(name: &'static str, factory: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let fut = factory();
            if let Err(e) = tokio::spawn(fut).await {
                error!(loop_name = name, error = %e, "loop task failed — restarting in 5s");
            } else {
                warn!(loop_name = name, "loop returned — restarting in 5s");
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    });
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_config::CounterScope;
    use crate::notify::Notifier;
    use crate::storage::Store;
    use crate::types::TideKind;
    use chrono::TimeZone;

    fn state() -> EngineState {
        let path =
            std::env::temp_dir().join(format!("tideflow-sched-{}.json", uuid::Uuid::new_v4()));
        EngineState::new(
            EngineConfig::default(),
            Store::open(path, 7),
            Notifier::new(""),
        )
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
    }

    // 02:00 UTC == 09:00 local.
    fn tide() -> TideEvent {
        TideEvent {
            kind: TideKind::High,
            center_ts: at(2, 0),
        }
    }

    fn state_with_paper_account() -> EngineState {
        use crate::engine::executor::{AccountRuntime, ExecuteHub};
        use crate::exchange::{ExchangeClient, PaperClient};
        use crate::market_data::KlineFetcher;

        let mut s = state();
        let fetcher = KlineFetcher::new("http://localhost:1");
        s.hub = ExecuteHub::new(
            vec![AccountRuntime {
                name: "alpha".into(),
                client: ExchangeClient::Paper(PaperClient::new(fetcher)),
                pair_override: None,
            }],
            None,
        );
        s
    }

    #[test]
    fn gate_params_take_user_quotas() {
        let cfg = EngineConfig::default();
        let mut settings = UserSettings::default();
        settings.tide_window_hours = 1.5;
        settings.max_orders_per_day = 4;
        let p = gate_params(&cfg, &settings);
        assert!((p.tide_window_hours - 1.5).abs() < f64::EPSILON);
        assert_eq!(p.max_orders_per_day, 4);
        assert_eq!(p.counter_scope, CounterScope::PerUser);
    }

    #[tokio::test]
    async fn auto_flow_opens_bumps_and_bookkeeps() {
        let s = state_with_paper_account();
        let now = at(2, 30); // tau = +0.5h, inside the window
        let result = execute_entry_flow(
            &s, 7, Side::Long, 7, "report", Some(tide()), 30000.0, "7:1", now,
        )
        .await;

        let FlowResult::Opened { window_id } = result else {
            panic!("expected Opened, got {result:?}");
        };
        assert_eq!(window_id, "20250101T0900-HIGH");

        // Counters bumped exactly once.
        assert_eq!(s.store.get_counter("DAY:7:2025-01-01"), 1);
        assert_eq!(s.store.get_counter("TW:7:20250101T0900-HIGH"), 1);

        // Bookkeeping on the user record.
        let user = s.store.get_user(7, now);
        assert_eq!(user.today.count, 1);
        assert_eq!(user.tide_window_trades["20250101T0900-HIGH"], 1);
        let last = user.last_entry.unwrap();
        assert_eq!(last.window_key, "20250101T0900-HIGH");
        assert!((last.price - 30000.0).abs() < 1e-9);
        assert_eq!(user.history.len(), 1);

        // Open position recorded with the tide center and deadline.
        let pos = s.open_position(7).unwrap();
        assert_eq!(pos.side, Side::Long);
        assert!(pos.simulated);
        assert_eq!(pos.tide_center, Some(at(2, 0)));
        assert_eq!(pos.tp_deadline(4.0), at(6, 0));
    }

    #[tokio::test]
    async fn flow_is_idempotent_under_same_op_id() {
        let s = state_with_paper_account();
        let now = at(2, 30);
        for _ in 0..2 {
            execute_entry_flow(
                &s, 7, Side::Long, 7, "report", Some(tide()), 30000.0, "7:same-slot", now,
            )
            .await;
        }
        // The second pass re-opened a position but could not double-bump.
        assert_eq!(s.store.get_counter("DAY:7:2025-01-01"), 1);
        assert_eq!(s.store.get_counter("TW:7:20250101T0900-HIGH"), 1);
    }

    #[tokio::test]
    async fn quota_denial_changes_nothing() {
        let s = state_with_paper_account();
        let now = at(2, 30);
        // Two prior opens already counted in this window.
        s.store.incr_counter("TW:7:20250101T0900-HIGH", 2);
        s.store.incr_counter("DAY:7:2025-01-01", 2);

        let result = execute_entry_flow(
            &s, 7, Side::Long, 7, "report", Some(tide()), 30000.0, "7:2", now,
        )
        .await;

        let FlowResult::GateBlocked(reason) = result else {
            panic!("expected GateBlocked, got {result:?}");
        };
        assert_eq!(reason.to_string(), "MAX_ORDERS_PER_TW_REACHED");
        assert_eq!(s.store.get_counter("TW:7:20250101T0900-HIGH"), 2);
        assert_eq!(s.store.get_counter("DAY:7:2025-01-01"), 2);
        assert!(s.open_position(7).is_none());
        assert_eq!(s.store.get_user(7, now).today.count, 0);
    }

    #[tokio::test]
    async fn no_accounts_means_not_opened_and_no_bump() {
        let s = state(); // no accounts configured
        let now = at(2, 30);
        let result = execute_entry_flow(
            &s, 7, Side::Long, 7, "report", Some(tide()), 30000.0, "7:3", now,
        )
        .await;
        assert!(matches!(result, FlowResult::NotOpened));
        assert_eq!(s.store.get_counter("DAY:7:2025-01-01"), 0);
        assert!(s.open_position(7).is_none());
    }

    #[tokio::test]
    async fn no_tide_data_blocks_flow() {
        let s = state_with_paper_account();
        let result = execute_entry_flow(
            &s, 7, Side::Long, 7, "report", None, 30000.0, "7:4", at(2, 30),
        )
        .await;
        let FlowResult::GateBlocked(reason) = result else {
            panic!("expected GateBlocked");
        };
        assert_eq!(reason.to_string(), "NO_TIDE_DATA");
    }
}
