// =============================================================================
// Indicator Kernel
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the
// scoring pipeline. Every public function returns an empty series or `None`
// on insufficient data so callers are forced to handle the edge cases.
//
// `IndicatorFrame` bundles the full stack computed once per (symbol,
// timeframe) fetch: RSI14 with its EMA12 signal line, Stochastic %D with its
// SlowD signal line, volume MA20, and the sonic trend (EMA34 vs EMA89).
// =============================================================================

pub mod ema;
pub mod rsi;
pub mod stoch;

pub use ema::{ema, sonic_trend};
pub use rsi::rsi;
pub use stoch::{sma, stoch_k};

use crate::market_data::Candle;
use crate::types::Side;

/// RSI look-back.
pub const RSI_PERIOD: usize = 14;
/// EMA span applied to the RSI series.
pub const RSI_EMA_SPAN: usize = 12;
/// Stochastic %K window.
pub const STOCH_WINDOW: usize = 14;
/// Stochastic smoothing (%D and SlowD).
pub const STOCH_SMOOTH: usize = 3;
/// Volume moving-average window.
pub const VOL_MA_WINDOW: usize = 20;

/// Mean volume of the last `window` closed bars.
pub fn volume_ma(volumes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || volumes.len() < window {
        return None;
    }
    let sum: f64 = volumes[volumes.len() - window..].iter().sum();
    Some(sum / window as f64)
}

/// Upper wick as a fraction of the bar range, clamped to [0, 1].
/// A zero-range bar has no wick.
pub fn upper_wick_ratio(c: &Candle) -> f64 {
    let range = c.high - c.low;
    if range <= 0.0 {
        return 0.0;
    }
    ((c.high - c.open.max(c.close)) / range).max(0.0)
}

/// Lower wick as a fraction of the bar range, clamped to [0, 1].
pub fn lower_wick_ratio(c: &Candle) -> f64 {
    let range = c.high - c.low;
    if range <= 0.0 {
        return 0.0;
    }
    ((c.open.min(c.close) - c.low) / range).max(0.0)
}

/// Full indicator stack for one timeframe, computed over closed bars.
///
/// Series are tail-aligned: the last element of every series corresponds to
/// the most recent closed bar, so cross detection can zip suffixes directly.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
    pub rsi: Vec<f64>,
    pub ema_rsi: Vec<f64>,
    pub stoch_d: Vec<f64>,
    pub slow_d: Vec<f64>,
    pub vol_ma: Option<f64>,
    pub sonic: Option<Side>,
}

/// Bars required for the RSI/Stoch stack (RSI seed + EMA12 + double smooth).
pub const MIN_FRAME_BARS: usize = 40;

impl IndicatorFrame {
    /// Compute the stack over `candles`. Returns `None` when there are not
    /// enough closed bars for the RSI/Stoch chain; the sonic trend degrades
    /// to `None` independently when fewer than 89 bars are available.
    pub fn compute(candles: &[Candle]) -> Option<Self> {
        if candles.len() < MIN_FRAME_BARS {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let rsi_series = rsi(&closes, RSI_PERIOD);
        let ema_rsi_series = ema(&rsi_series, RSI_EMA_SPAN);
        let k = stoch_k(&highs, &lows, &closes, STOCH_WINDOW);
        let stoch_d_series = sma(&k, STOCH_SMOOTH);
        let slow_d_series = sma(&stoch_d_series, STOCH_SMOOTH);

        if ema_rsi_series.is_empty() || slow_d_series.is_empty() {
            return None;
        }

        Some(Self {
            vol_ma: volume_ma(&volumes, VOL_MA_WINDOW),
            sonic: sonic_trend(&closes),
            closes,
            volumes,
            rsi: rsi_series,
            ema_rsi: ema_rsi_series,
            stoch_d: stoch_d_series,
            slow_d: slow_d_series,
        })
    }

    pub fn last_close(&self) -> f64 {
        *self.closes.last().unwrap_or(&0.0)
    }

    pub fn last_rsi(&self) -> f64 {
        *self.rsi.last().unwrap_or(&0.0)
    }

    pub fn last_ema_rsi(&self) -> f64 {
        *self.ema_rsi.last().unwrap_or(&0.0)
    }

    pub fn last_stoch_d(&self) -> f64 {
        *self.stoch_d.last().unwrap_or(&0.0)
    }

    pub fn last_slow_d(&self) -> f64 {
        *self.slow_d.last().unwrap_or(&0.0)
    }
}

/// Zip the tails of two series into `(a, b)` pairs, newest last, at most
/// `n` pairs. Series of different lengths align on their final elements.
pub fn tail_pairs(a: &[f64], b: &[f64], n: usize) -> Vec<(f64, f64)> {
    let len = a.len().min(b.len()).min(n);
    let a_tail = &a[a.len() - len..];
    let b_tail = &b[b.len() - len..];
    a_tail.iter().copied().zip(b_tail.iter().copied()).collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn wavy_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.45).sin() * 5.0;
                candle(base, base + 1.5, base - 1.5, base + 0.5, 10.0 + (i % 7) as f64)
            })
            .collect()
    }

    // ---- volume_ma -------------------------------------------------------

    #[test]
    fn volume_ma_mean_of_tail() {
        let volumes: Vec<f64> = (1..=25).map(|x| x as f64).collect();
        // Last 20 values are 6..=25, mean 15.5.
        assert!((volume_ma(&volumes, 20).unwrap() - 15.5).abs() < 1e-10);
    }

    #[test]
    fn volume_ma_insufficient() {
        assert!(volume_ma(&[1.0, 2.0], 20).is_none());
        assert!(volume_ma(&[1.0], 0).is_none());
    }

    // ---- wick ratios -----------------------------------------------------

    #[test]
    fn wick_ratios_bullish_hammer() {
        // Range 0..10, body 8..9: lower wick 0.8, upper wick 0.1.
        let c = candle(9.0, 10.0, 0.0, 8.0, 1.0);
        assert!((lower_wick_ratio(&c) - 0.8).abs() < 1e-10);
        assert!((upper_wick_ratio(&c) - 0.1).abs() < 1e-10);
    }

    #[test]
    fn wick_ratios_zero_range_bar() {
        let c = candle(5.0, 5.0, 5.0, 5.0, 1.0);
        assert_eq!(upper_wick_ratio(&c), 0.0);
        assert_eq!(lower_wick_ratio(&c), 0.0);
    }

    #[test]
    fn wick_ratios_marubozu() {
        // Full-body bar: no wicks.
        let c = candle(1.0, 2.0, 1.0, 2.0, 1.0);
        assert_eq!(upper_wick_ratio(&c), 0.0);
        assert_eq!(lower_wick_ratio(&c), 0.0);
    }

    // ---- IndicatorFrame --------------------------------------------------

    #[test]
    fn frame_requires_min_bars() {
        assert!(IndicatorFrame::compute(&wavy_candles(10)).is_none());
        assert!(IndicatorFrame::compute(&wavy_candles(MIN_FRAME_BARS)).is_some());
    }

    #[test]
    fn frame_series_are_tail_aligned() {
        let frame = IndicatorFrame::compute(&wavy_candles(120)).unwrap();
        assert!(!frame.rsi.is_empty());
        assert!(!frame.ema_rsi.is_empty());
        assert!(!frame.slow_d.is_empty());
        assert!(frame.vol_ma.is_some());
        // RSI stays in range over a bounded oscillation.
        for &v in &frame.rsi {
            assert!((0.0..=100.0).contains(&v));
        }
        for &v in &frame.stoch_d {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn frame_sonic_needs_89_bars() {
        let frame = IndicatorFrame::compute(&wavy_candles(60)).unwrap();
        assert!(frame.sonic.is_none());

        let rising: Vec<Candle> = (0..200)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 1.0, base - 1.0, base + 0.8, 10.0)
            })
            .collect();
        let frame = IndicatorFrame::compute(&rising).unwrap();
        assert_eq!(frame.sonic, Some(Side::Long));
    }

    // ---- tail_pairs ------------------------------------------------------

    #[test]
    fn tail_pairs_aligns_on_final_elements() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![30.0, 40.0];
        let pairs = tail_pairs(&a, &b, 3);
        assert_eq!(pairs, vec![(3.0, 30.0), (4.0, 40.0)]);
    }

    #[test]
    fn tail_pairs_caps_at_n() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![5.0, 6.0, 7.0, 8.0];
        assert_eq!(tail_pairs(&a, &b, 2).len(), 2);
    }
}
