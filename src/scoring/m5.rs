// =============================================================================
// M5 entry gate — exhaustion candle + oscillator confirmation clusters
// =============================================================================
//
// Two independent clusters over the closed M5 bars:
//
//   Cluster A (candle + volume + zone extreme): a bar with a rejection wick
//   of at least `m5_wick_pct` of its range (lower wick for longs, upper for
//   shorts), volume at least `mult` times the 20-bar volume MA, and RSI in
//   the matching extreme zone (Z1 long / Z5 short).
//
//   Cluster B (dual RSI/Stoch cross or align): the same dual logic as the
//   higher timeframes, zone-free.
//
// Relaxed mode accepts clusters per `m5_relax_kind`; strict mode requires
// BOTH in the same direction within `entry_seq_window_min` minutes.
// =============================================================================

use serde::Serialize;

use crate::engine_config::{EngineConfig, M5RelaxKind};
use crate::indicators::{lower_wick_ratio, upper_wick_ratio, IndicatorFrame};
use crate::market_data::Candle;
use crate::scoring::timeframe::recent_cross;
use crate::scoring::zones::{rsi_zone, Zone};
use crate::types::Side;

/// Outcome of the M5 gate for one desired direction.
#[derive(Debug, Clone, Serialize)]
pub struct M5GateResult {
    pub pass: bool,
    pub side: Side,
    /// Bars ago (0 = last closed bar) at which the candle cluster fired.
    pub cluster_a: Option<usize>,
    pub cluster_b: bool,
    pub strict: bool,
    /// Close of the last M5 bar, the entry reference price downstream.
    pub ref_close: f64,
    pub detail: String,
}

/// Scan the last `lookback` closed bars for a cluster-A hit.
///
/// The RSI series is tail-aligned with the candles, so bar `len-1-k` pairs
/// with RSI `len-1-k` counted from each series' own end.
fn find_candle_cluster(
    side: Side,
    candles: &[Candle],
    frame: &IndicatorFrame,
    lookback: usize,
    vol_mult: f64,
    wick_pct: f64,
) -> Option<usize> {
    let vol_ma = frame.vol_ma?;
    if vol_ma <= 0.0 {
        return None;
    }

    let usable = lookback.min(candles.len()).min(frame.rsi.len());
    for bars_ago in 0..usable {
        let candle = &candles[candles.len() - 1 - bars_ago];
        let rsi_at = frame.rsi[frame.rsi.len() - 1 - bars_ago];

        let wick = match side {
            Side::Long => lower_wick_ratio(candle),
            Side::Short => upper_wick_ratio(candle),
        };
        if wick < wick_pct {
            continue;
        }
        if candle.volume < vol_mult * vol_ma {
            continue;
        }
        let zone_ok = match side {
            Side::Long => rsi_zone(rsi_at) == Zone::Z1,
            Side::Short => rsi_zone(rsi_at) == Zone::Z5,
        };
        if zone_ok {
            return Some(bars_ago);
        }
    }
    None
}

/// Dual RSI/Stoch confirmation in `side`'s direction, zone-free.
fn dual_confirm(side: Side, frame: &IndicatorFrame, cfg: &EngineConfig) -> bool {
    let rsi_cross = recent_cross(&frame.rsi, &frame.ema_rsi, cfg.cross_recent_n);
    let stoch_cross = recent_cross(&frame.stoch_d, &frame.slow_d, cfg.cross_recent_n);
    let crossed = matches!(
        (rsi_cross, stoch_cross),
        (Some(a), Some(b)) if a.side == side && b.side == side
    );
    if crossed {
        return true;
    }

    let rsi_gap = frame.last_rsi() - frame.last_ema_rsi();
    let stoch_gap = frame.last_stoch_d() - frame.last_slow_d();
    match side {
        Side::Long => rsi_gap >= cfg.rsi_gap_min && stoch_gap >= cfg.stch_gap_min,
        Side::Short => rsi_gap <= -cfg.rsi_gap_min && stoch_gap <= -cfg.stch_gap_min,
    }
}

/// Evaluate the gate for `desired` over closed M5 bars.
pub fn m5_gate(
    desired: Side,
    candles: &[Candle],
    frame: &IndicatorFrame,
    cfg: &EngineConfig,
) -> M5GateResult {
    let strict = cfg.m5_strict_mode;
    let (lookback, vol_mult) = if strict {
        (cfg.m5_lookback_strict, cfg.m5_vol_mult_strict)
    } else {
        (cfg.m5_lookback_relax, cfg.m5_vol_mult_relax)
    };
    let lookback = if cfg.m5_need_current_bar { 1 } else { lookback };

    let cluster_a = find_candle_cluster(
        desired,
        candles,
        frame,
        lookback,
        vol_mult,
        cfg.m5_wick_pct,
    );
    let cluster_b = dual_confirm(desired, frame, cfg);

    let pass = if strict {
        // Both clusters, and the candle recent enough to be one sequence.
        match cluster_a {
            Some(bars_ago) => {
                cluster_b && (bars_ago as i64 * 5) <= cfg.entry_seq_window_min
            }
            None => false,
        }
    } else {
        match cfg.m5_relax_kind {
            M5RelaxKind::Either => cluster_a.is_some() || cluster_b,
            M5RelaxKind::RsiOnly => cluster_b,
            M5RelaxKind::CandleOnly => cluster_a.is_some(),
        }
    };

    let detail = format!(
        "A={} B={} mode={}",
        cluster_a
            .map(|k| format!("hit@{k}"))
            .unwrap_or_else(|| "miss".to_string()),
        if cluster_b { "hit" } else { "miss" },
        if strict { "strict" } else { "relax" },
    );

    M5GateResult {
        pass,
        side: desired,
        cluster_a,
        cluster_b,
        strict,
        ref_close: frame.last_close(),
        detail,
    }
}
