// =============================================================================
// Per-timeframe directional scoring
// =============================================================================
//
// One timeframe (H4 or M30, and the M5 frame for the entry gate) is reduced
// to a side and a score magnitude from four sub-signals:
//
//   1. RSI position & movement — zone base points scaled by the timeframe
//      magnitude, full weight when the oscillator moves with the side,
//      half weight against; Z3 is a barrier (-1) when alignment is unclear.
//   2. Stochastic position & cross — same zone table on %D, plus a cross
//      bonus when %D crossed SlowD recently with enough slope.
//   3. Dual-cross / dual-align overrides — when RSI×EMA(RSI) and %D×SlowD
//      agree by recent crossover (or by current side), the side is forced
//      and the corresponding bonus added.
//   4. Zone transitions, extreme penalty, and the sonic trend (weight or
//      veto).
//
// The returned score is the magnitude credited to `side`; a frame with no
// resolvable side scores zero.
// =============================================================================

use serde::Serialize;

use crate::engine_config::EngineConfig;
use crate::indicators::{tail_pairs, IndicatorFrame};
use crate::scoring::zones::{classify_transition, rsi_zone, stoch_zone, Zone};
use crate::types::Side;

/// The timeframes the scorer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Timeframe {
    H4,
    M30,
    M5,
}

impl Timeframe {
    /// Kline interval string for the fetcher.
    pub fn interval(self) -> &'static str {
        match self {
            Self::H4 => "4h",
            Self::M30 => "30m",
            Self::M5 => "5m",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H4 => write!(f, "H4"),
            Self::M30 => write!(f, "M30"),
            Self::M5 => write!(f, "M5"),
        }
    }
}

/// A detected signal-line crossover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrossEvent {
    pub side: Side,
    /// 0 = the cross completed on the most recent closed bar.
    pub bars_ago: usize,
}

/// Scoring frame for one timeframe — the closed record downstream stages
/// read fields from.
#[derive(Debug, Clone, Serialize)]
pub struct TfScore {
    pub timeframe: Timeframe,
    pub side: Option<Side>,
    pub score: f64,
    pub zone_rsi: Zone,
    pub zone_stoch: Zone,
    pub move_rsi: f64,
    pub move_stoch: f64,
    pub rsi_gap: f64,
    pub stoch_gap: f64,
    pub stoch_slope: f64,
    pub rsi_cross: Option<CrossEvent>,
    pub stoch_cross: Option<CrossEvent>,
    pub dual_cross: bool,
    pub dual_align: bool,
    pub sonic: Option<Side>,
    pub last_rsi: f64,
    pub last_stoch_d: f64,
    pub last_close: f64,
    /// Trailing closed bars whose close moved with `side`.
    pub consec_closes: usize,
    /// Debug bag: one short line per contribution.
    pub notes: Vec<String>,
}

/// Length of the trailing run of closes moving in `side`'s direction.
pub fn trailing_consec_closes(closes: &[f64], side: Side) -> usize {
    let mut count = 0;
    for w in closes.windows(2).rev() {
        let agrees = match side {
            Side::Long => w[1] > w[0],
            Side::Short => w[1] < w[0],
        };
        if agrees {
            count += 1;
        } else {
            break;
        }
    }
    count
}

/// Most recent sign change of `a - b` within the last `n` bars.
///
/// Series align on their final elements; `bars_ago` counts back from the
/// last closed bar.
pub fn recent_cross(a: &[f64], b: &[f64], n: usize) -> Option<CrossEvent> {
    // One extra pair so a cross on the oldest inspected bar is visible.
    let pairs = tail_pairs(a, b, n + 1);
    if pairs.len() < 2 {
        return None;
    }

    let diffs: Vec<f64> = pairs.iter().map(|(x, y)| x - y).collect();
    for i in (1..diffs.len()).rev() {
        let prev = diffs[i - 1];
        let curr = diffs[i];
        if curr > 0.0 && prev <= 0.0 {
            return Some(CrossEvent {
                side: Side::Long,
                bars_ago: diffs.len() - 1 - i,
            });
        }
        if curr < 0.0 && prev >= 0.0 {
            return Some(CrossEvent {
                side: Side::Short,
                bars_ago: diffs.len() - 1 - i,
            });
        }
    }
    None
}

/// Side-relative strength of sitting in `zone`: recovery zones score full,
/// the pivot band nothing, continuation zones a quarter.
fn zone_strength(zone: Zone, side: Side) -> f64 {
    match side {
        Side::Long => match zone {
            Zone::Z1 => 1.0,
            Zone::Z2 => 0.75,
            Zone::Z3 => 0.0,
            Zone::Z4 => 0.25,
            Zone::Z5 => 0.0,
        },
        Side::Short => match zone {
            Zone::Z5 => 1.0,
            Zone::Z4 => 0.75,
            Zone::Z3 => 0.0,
            Zone::Z2 => 0.25,
            Zone::Z1 => 0.0,
        },
    }
}

fn align_side(gap: f64, min: f64) -> Option<Side> {
    if gap >= min {
        Some(Side::Long)
    } else if gap <= -min {
        Some(Side::Short)
    } else {
        None
    }
}

/// Does `m` move in the side's favorable direction (rising for long,
/// falling for short)?
fn move_agrees(m: f64, side: Side) -> bool {
    match side {
        Side::Long => m > 0.0,
        Side::Short => m < 0.0,
    }
}

/// Score one timeframe. `frame` must carry at least two values in each
/// oscillator series (guaranteed by `IndicatorFrame::compute`).
pub fn score_timeframe(tf: Timeframe, frame: &IndicatorFrame, cfg: &EngineConfig) -> TfScore {
    let sp = &cfg.scoring;

    let last_rsi = frame.last_rsi();
    let prev_rsi = frame.rsi[frame.rsi.len().saturating_sub(2)];
    let last_d = frame.last_stoch_d();
    let prev_d = frame.stoch_d[frame.stoch_d.len().saturating_sub(2)];

    let zone_rsi = rsi_zone(last_rsi);
    let zone_stoch = stoch_zone(last_d);
    let prev_zone_rsi = rsi_zone(prev_rsi);
    let prev_zone_stoch = stoch_zone(prev_d);

    let move_rsi = last_rsi - prev_rsi;
    let move_stoch = last_d - prev_d;
    let rsi_gap = last_rsi - frame.last_ema_rsi();
    let stoch_gap = last_d - frame.last_slow_d();
    let stoch_slope = move_stoch;

    let rsi_align = align_side(rsi_gap, cfg.rsi_gap_min);
    let stoch_align = align_side(stoch_gap, cfg.stch_gap_min);

    let rsi_cross = recent_cross(&frame.rsi, &frame.ema_rsi, cfg.cross_recent_n);
    let stoch_cross = recent_cross(&frame.stoch_d, &frame.slow_d, cfg.cross_recent_n);

    let dual_cross = matches!(
        (rsi_cross, stoch_cross),
        (Some(a), Some(b)) if a.side == b.side
    );
    let dual_align = matches!(
        (rsi_align, stoch_align),
        (Some(a), Some(b)) if a == b
    );

    let mut notes = Vec::new();

    // ── Side resolution: dual cross > dual align > single alignment ─────
    let mut side = if dual_cross {
        let s = rsi_cross.map(|c| c.side);
        notes.push(format!("dual_cross {}", s.map(|s| s.to_string()).unwrap_or_default()));
        s
    } else if dual_align {
        notes.push(format!("dual_align {}", rsi_align.map(|s| s.to_string()).unwrap_or_default()));
        rsi_align
    } else {
        rsi_align.or(stoch_align)
    };

    let mut score = 0.0;

    if let Some(s) = side {
        // ── Override bonuses ─────────────────────────────────────────────
        if dual_cross {
            score += sp.tf_cross_bonus;
        }
        if dual_align {
            score += sp.tf_align_bonus;
        }

        // ── RSI position & movement ──────────────────────────────────────
        let rsi_base = match tf {
            Timeframe::H4 => sp.rsi_base_h4,
            _ => sp.rsi_base_m30,
        };
        let rsi_pts = zone_strength(zone_rsi, s)
            * rsi_base
            * if move_agrees(move_rsi, s) { 1.0 } else { 0.5 };
        if rsi_pts > 0.0 {
            score += rsi_pts;
            notes.push(format!("rsi {zone_rsi} +{rsi_pts:.2}"));
        }
        if zone_rsi == Zone::Z3 && rsi_align.is_none() {
            score -= 1.0;
            notes.push("rsi Z3 barrier -1.00".to_string());
        }

        // ── Stochastic position & cross ──────────────────────────────────
        let stoch_pts = zone_strength(zone_stoch, s)
            * sp.stoch_base
            * if move_agrees(move_stoch, s) { 1.0 } else { 0.5 };
        if stoch_pts > 0.0 {
            score += stoch_pts;
            notes.push(format!("stoch {zone_stoch} +{stoch_pts:.2}"));
        }
        if let Some(cross) = stoch_cross {
            if cross.side == s
                && cross.bars_ago < cfg.stch_recent_n
                && stoch_slope.abs() >= cfg.stch_slope_min
            {
                let bonus = 0.5 * sp.stoch_base;
                score += bonus;
                notes.push(format!("stoch_cross +{bonus:.2}"));
            }
        }

        // ── Zone transitions (both oscillators) ──────────────────────────
        for (label, prev, curr) in [
            ("rsi", prev_zone_rsi, zone_rsi),
            ("stoch", prev_zone_stoch, zone_stoch),
        ] {
            if let Some(t) = classify_transition(prev, curr) {
                if t.side() == s {
                    score += sp.transition_bonus;
                    notes.push(format!("{label} {prev}->{curr} +{:.2}", sp.transition_bonus));
                }
            }
        }

        // ── Extreme penalty ──────────────────────────────────────────────
        let exhausted = match s {
            Side::Long => zone_rsi == Zone::Z5 || zone_stoch == Zone::Z5,
            Side::Short => zone_rsi == Zone::Z1 || zone_stoch == Zone::Z1,
        };
        if exhausted {
            score -= sp.tf_extreme_penalty;
            notes.push(format!("extreme -{:.2}", sp.tf_extreme_penalty));
        }

        // ── Sonic trend ──────────────────────────────────────────────────
        match cfg.sonic_mode {
            crate::engine_config::SonicMode::Off => {}
            crate::engine_config::SonicMode::Weight => {
                if frame.sonic == Some(s) {
                    score += cfg.sonic_weight;
                    notes.push(format!("sonic +{:.2}", cfg.sonic_weight));
                }
            }
            crate::engine_config::SonicMode::Veto => {
                if let Some(trend) = frame.sonic {
                    if trend != s {
                        notes.push("sonic veto".to_string());
                        side = None;
                        score = 0.0;
                    }
                }
            }
        }
    }

    TfScore {
        timeframe: tf,
        side,
        score,
        zone_rsi,
        zone_stoch,
        move_rsi,
        move_stoch,
        rsi_gap,
        stoch_gap,
        stoch_slope,
        rsi_cross,
        stoch_cross,
        dual_cross,
        dual_align,
        sonic: frame.sonic,
        last_rsi,
        last_stoch_d: last_d,
        last_close: frame.last_close(),
        consec_closes: side
            .map(|s| trailing_consec_closes(&frame.closes, s))
            .unwrap_or(0),
        notes,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_config::SonicMode;

    /// Hand-built frame: series already tail-aligned, newest last.
    fn frame(
        rsi: Vec<f64>,
        ema_rsi: Vec<f64>,
        stoch_d: Vec<f64>,
        slow_d: Vec<f64>,
        sonic: Option<Side>,
    ) -> IndicatorFrame {
        IndicatorFrame {
            closes: vec![100.0; rsi.len()],
            volumes: vec![10.0; rsi.len()],
            rsi,
            ema_rsi,
            stoch_d,
            slow_d,
            vol_ma: Some(10.0),
            sonic,
        }
    }

    fn cfg() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.sonic_mode = SonicMode::Off;
        cfg
    }

    // ---- recent_cross ----------------------------------------------------

    #[test]
    fn cross_detected_up() {
        let a = vec![1.0, 2.0, 4.0];
        let b = vec![3.0, 3.0, 3.0];
        let cross = recent_cross(&a, &b, 3).unwrap();
        assert_eq!(cross.side, Side::Long);
        assert_eq!(cross.bars_ago, 0);
    }

    #[test]
    fn cross_detected_down_with_age() {
        let a = vec![5.0, 2.0, 1.5, 1.0];
        let b = vec![3.0, 3.0, 3.0, 3.0];
        let cross = recent_cross(&a, &b, 4).unwrap();
        assert_eq!(cross.side, Side::Short);
        assert_eq!(cross.bars_ago, 2);
    }

    #[test]
    fn no_cross_when_always_above() {
        let a = vec![5.0, 6.0, 7.0];
        let b = vec![1.0, 1.0, 1.0];
        assert!(recent_cross(&a, &b, 3).is_none());
    }

    #[test]
    fn cross_outside_lookback_ignored() {
        let a = vec![1.0, 5.0, 6.0, 7.0, 8.0];
        let b = vec![3.0, 3.0, 3.0, 3.0, 3.0];
        // Cross happened 3 bars ago; lookback of 2 misses it.
        assert!(recent_cross(&a, &b, 2).is_none());
        assert!(recent_cross(&a, &b, 4).is_some());
    }

    // ---- score_timeframe -------------------------------------------------

    #[test]
    fn dual_align_long_sets_side_and_bonus() {
        // RSI rising above its EMA, %D above SlowD: oversold recovery long.
        let f = frame(
            vec![25.0, 28.0],
            vec![24.0, 24.5],
            vec![15.0, 18.0],
            vec![10.0, 11.0],
            None,
        );
        let score = score_timeframe(Timeframe::M30, &f, &cfg());
        assert_eq!(score.side, Some(Side::Long));
        assert!(score.dual_align);
        // align bonus + Z1 base + S1 stoch... Z1 long strength 1.0.
        assert!(score.score >= cfg().scoring.tf_align_bonus);
        assert_eq!(score.zone_rsi, Zone::Z1);
    }

    #[test]
    fn h4_uses_larger_rsi_magnitude_than_m30() {
        let build = || {
            frame(
                vec![25.0, 28.0],
                vec![24.0, 24.5],
                vec![45.0, 44.0], // stoch neutral-ish, no alignment
                vec![44.5, 44.2],
                None,
            )
        };
        let c = cfg();
        let h4 = score_timeframe(Timeframe::H4, &build(), &c);
        let m30 = score_timeframe(Timeframe::M30, &build(), &c);
        assert_eq!(h4.side, Some(Side::Long));
        assert_eq!(m30.side, Some(Side::Long));
        assert!(h4.score > m30.score);
    }

    #[test]
    fn z3_barrier_penalizes_unclear_alignment() {
        // RSI parked in the pivot band with no gap; stoch aligned short.
        let f = frame(
            vec![50.0, 50.2],
            vec![50.0, 50.1],
            vec![75.0, 70.0],
            vec![78.0, 77.0],
            None,
        );
        let score = score_timeframe(Timeframe::M30, &f, &cfg());
        assert_eq!(score.side, Some(Side::Short));
        assert!(score.notes.iter().any(|n| n.contains("Z3 barrier")));
    }

    #[test]
    fn extreme_penalty_applies_to_exhausted_long() {
        // Long side with RSI pinned in Z5.
        let f = frame(
            vec![80.0, 85.0],
            vec![75.0, 76.0],
            vec![85.0, 88.0],
            vec![80.0, 81.0],
            None,
        );
        let score = score_timeframe(Timeframe::M30, &f, &cfg());
        assert_eq!(score.side, Some(Side::Long));
        assert!(score.notes.iter().any(|n| n.starts_with("extreme")));
    }

    #[test]
    fn sonic_veto_clears_disagreeing_side() {
        let f = frame(
            vec![25.0, 28.0],
            vec![24.0, 24.5],
            vec![15.0, 18.0],
            vec![10.0, 11.0],
            Some(Side::Short),
        );
        let mut c = cfg();
        c.sonic_mode = SonicMode::Veto;
        let score = score_timeframe(Timeframe::M30, &f, &c);
        assert_eq!(score.side, None);
        assert_eq!(score.score, 0.0);
        assert!(score.notes.iter().any(|n| n == "sonic veto"));
    }

    #[test]
    fn sonic_weight_adds_when_agreeing() {
        let f_agree = frame(
            vec![25.0, 28.0],
            vec![24.0, 24.5],
            vec![15.0, 18.0],
            vec![10.0, 11.0],
            Some(Side::Long),
        );
        let f_neutral = frame(
            vec![25.0, 28.0],
            vec![24.0, 24.5],
            vec![15.0, 18.0],
            vec![10.0, 11.0],
            None,
        );
        let mut c = cfg();
        c.sonic_mode = SonicMode::Weight;
        let with = score_timeframe(Timeframe::M30, &f_agree, &c);
        let without = score_timeframe(Timeframe::M30, &f_neutral, &c);
        assert!((with.score - without.score - c.sonic_weight).abs() < 1e-9);
    }

    #[test]
    fn no_alignment_no_side() {
        let f = frame(
            vec![50.0, 50.1],
            vec![50.0, 50.05],
            vec![50.0, 50.1],
            vec![50.0, 50.05],
            None,
        );
        let score = score_timeframe(Timeframe::M30, &f, &cfg());
        assert_eq!(score.side, None);
        assert_eq!(score.score, 0.0);
    }

    #[test]
    fn dual_cross_forces_side_with_bonus() {
        // Both oscillators cross up on the last bar while gaps stay small.
        let f = frame(
            vec![49.0, 52.0],
            vec![50.0, 50.5],
            vec![49.0, 53.0],
            vec![50.0, 50.5],
            None,
        );
        let c = cfg();
        let score = score_timeframe(Timeframe::M30, &f, &c);
        assert!(score.dual_cross);
        assert_eq!(score.side, Some(Side::Long));
        assert!(score.score >= c.scoring.tf_cross_bonus);
    }

    #[test]
    fn trailing_consec_counts_runs() {
        let closes = vec![1.0, 2.0, 1.5, 2.0, 3.0, 4.0];
        assert_eq!(trailing_consec_closes(&closes, Side::Long), 3);
        assert_eq!(trailing_consec_closes(&closes, Side::Short), 0);
        let falling = vec![5.0, 4.0, 3.0];
        assert_eq!(trailing_consec_closes(&falling, Side::Short), 2);
        assert_eq!(trailing_consec_closes(&[1.0], Side::Long), 0);
    }

    #[test]
    fn safe_retrace_transition_rewarded() {
        // RSI recovers from Z1 into Z2 while aligned long.
        let f = frame(
            vec![28.0, 33.0],
            vec![27.0, 27.5],
            vec![25.0, 28.0],
            vec![20.0, 21.0],
            None,
        );
        let score = score_timeframe(Timeframe::M30, &f, &cfg());
        assert_eq!(score.side, Some(Side::Long));
        assert!(score.notes.iter().any(|n| n.contains("Z1->Z2")));
    }
}
