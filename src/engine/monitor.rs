// =============================================================================
// TP-by-time Monitor — deadline-driven position closer
// =============================================================================
//
// Checked per user per tick while a position is open:
//
//   - The live exchange position went flat before the deadline: classify the
//     close from the last traded price (within 0.1% of the stop, direction
//     aware, reads as SL; beyond the target reads as TP; anything else is a
//     manual close), feed the sentinel, clear the record, notify.
//   - The deadline passed while still open: close (hedge-aware) and classify
//     the result as TP.
//
// Monitor errors are logged and never fatal; the position is retried on the
// next tick.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::engine::{sentinel, EngineState, OpenPosition};
use crate::notify::format_close_notice;
use crate::types::{market_symbol, CloseResult, Side};

/// Relative distance from the stop that still reads as a stop-loss fill.
const SL_PROXIMITY: f64 = 0.001;

/// Classify how a now-flat position ended, from the last traded price.
pub fn classify_close(side: Side, price: f64, sl: f64, tp: f64) -> CloseResult {
    let near_sl = match side {
        Side::Long => price <= sl * (1.0 + SL_PROXIMITY),
        Side::Short => price >= sl * (1.0 - SL_PROXIMITY),
    };
    if near_sl {
        return CloseResult::Sl;
    }

    let beyond_tp = match side {
        Side::Long => price >= tp * (1.0 - SL_PROXIMITY),
        Side::Short => price <= tp * (1.0 + SL_PROXIMITY),
    };
    if beyond_tp {
        return CloseResult::Tp;
    }

    CloseResult::Manual
}

async fn finish_position(
    state: &EngineState,
    uid: u64,
    pos: &OpenPosition,
    result: CloseResult,
    price: f64,
    now: DateTime<Utc>,
) {
    let cfg = state.config.read().clone();
    sentinel::record_close(
        &state.store,
        uid,
        now,
        cfg.local_tz_offset_hours,
        result,
        &pos.window_key,
        cfg.auto_lock_on_2_sl,
    );
    state.clear_open_position(uid);
    state
        .notifier
        .send(uid, &format_close_notice(pos, result, price))
        .await;
    info!(uid, pair = %pos.pair, %result, price, "position closed and recorded");
}

/// Run one monitor pass for `uid`.
pub async fn check_tp_monitor(state: &EngineState, uid: u64, now: DateTime<Utc>) {
    let Some(pos) = state.open_position(uid) else {
        return;
    };

    let cfg = state.config.read().clone();
    let deadline = pos.tp_deadline(cfg.tp_time_hours);
    let symbol = market_symbol(&pos.pair);

    let client = pos
        .source_accounts
        .first()
        .and_then(|name| state.hub.client_named(name))
        .or_else(|| state.hub.primary_client());
    let Some(client) = client else {
        warn!(uid, "no exchange client available for monitor");
        return;
    };

    let live = match client.fetch_position(&symbol).await {
        Ok(live) => live,
        Err(e) => {
            warn!(uid, symbol, error = %e, "position query failed — retrying next tick");
            return;
        }
    };

    match live {
        None => {
            // Flat before (or at) the deadline: classify from the last price.
            let price = match client.fetch_ticker(&symbol).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(uid, symbol, error = %e, "ticker unavailable — classifying as manual close");
                    0.0
                }
            };
            let result = if price > 0.0 {
                classify_close(pos.side, price, pos.sl_price, pos.tp_price)
            } else {
                CloseResult::Manual
            };
            finish_position(state, uid, &pos, result, price, now).await;
        }
        Some(_) if now >= deadline => {
            info!(uid, symbol, %deadline, "tp-by-time deadline reached — closing");
            if let Err(e) = client.close_position(&symbol, 100.0, Some(pos.side)).await {
                warn!(uid, symbol, error = %e, "deadline close failed — retrying next tick");
                return;
            }
            let price = client.fetch_ticker(&symbol).await.unwrap_or(0.0);
            finish_position(state, uid, &pos, CloseResult::Tp, price, now).await;
        }
        Some(_) => {
            debug!(uid, symbol, %deadline, "position open, deadline not reached");
        }
    }
}
