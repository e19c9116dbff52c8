// =============================================================================
// Exponential Moving Average (EMA) — span-based smoothing
// =============================================================================
//
// alpha = 2 / (span + 1); each value blends into the running average as
// `next = value * alpha + prev * (1 - alpha)`. The series is seeded with the
// SMA of the first `span` inputs, so output element 0 corresponds to input
// index `span - 1`.
// =============================================================================

use crate::types::Side;

/// Compute the EMA series for `values` with the given look-back `span`.
///
/// Too little data or a zero span yields an empty series. A non-finite
/// intermediate truncates the output; downstream consumers must not trust a
/// broken tail.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    if span == 0 || values.len() < span {
        return Vec::new();
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let seed = values[..span].iter().sum::<f64>() / span as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(values.len() - span + 1);
    series.push(seed);

    values[span..]
        .iter()
        .scan(seed, |prev, &v| {
            *prev = v * alpha + *prev * (1.0 - alpha);
            Some(*prev)
        })
        .take_while(|v| v.is_finite())
        .for_each(|v| series.push(v));

    series
}

/// Sonic trend: the EMA34/EMA89 stack combined with the close position.
///
/// - `Some(Side::Long)`  when EMA34 > EMA89 and the close sits above EMA34
/// - `Some(Side::Short)` when EMA34 < EMA89 and the close sits below EMA34
/// - `None` ("side") otherwise, including insufficient data
pub fn sonic_trend(closes: &[f64]) -> Option<Side> {
    if closes.len() < 89 {
        return None;
    }

    let fast = *ema(closes, 34).last()?;
    let slow = *ema(closes, 89).last()?;
    let close = *closes.last()?;

    if fast > slow && close > fast {
        Some(Side::Long)
    } else if fast < slow && close < fast {
        Some(Side::Short)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_inputs_give_empty_series() {
        assert!(ema(&[], 5).is_empty());
        assert!(ema(&[1.0, 2.0, 3.0], 0).is_empty());
        assert!(ema(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn span_equal_to_length_is_the_sma() {
        let out = ema(&[2.0, 4.0, 6.0], 3);
        assert_eq!(out, vec![4.0]);
    }

    #[test]
    fn matches_hand_computed_recurrence() {
        // span 5 over 1..=10: seed SMA = 3.0, alpha = 1/3.
        let values: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let out = ema(&values, 5);
        assert_eq!(out.len(), 6);

        let alpha = 2.0 / 6.0;
        let mut expect = 3.0;
        for (i, &v) in values[5..].iter().enumerate() {
            expect = v * alpha + expect * (1.0 - alpha);
            assert!((out[i + 1] - expect).abs() < 1e-10);
        }
    }

    #[test]
    fn nan_truncates_the_series() {
        let out = ema(&[1.0, 2.0, 3.0, f64::NAN, 5.0], 3);
        assert_eq!(out.len(), 1); // seed only
    }

    #[test]
    fn ema_tracks_a_level_shift() {
        // After a long stretch at a new level, the EMA converges toward it.
        let mut values = vec![10.0; 40];
        values.extend(std::iter::repeat(20.0).take(120));
        let last = *ema(&values, 34).last().unwrap();
        assert!((last - 20.0).abs() < 0.5);
    }

    #[test]
    fn sonic_rising_series_is_long() {
        let closes: Vec<f64> = (1..=200).map(|x| x as f64).collect();
        assert_eq!(sonic_trend(&closes), Some(Side::Long));
    }

    #[test]
    fn sonic_falling_series_is_short() {
        let closes: Vec<f64> = (1..=200).rev().map(|x| x as f64).collect();
        assert_eq!(sonic_trend(&closes), Some(Side::Short));
    }

    #[test]
    fn sonic_flat_or_short_input_is_side() {
        assert_eq!(sonic_trend(&vec![100.0; 200]), None);
        let closes: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        assert_eq!(sonic_trend(&closes), None);
    }

    #[test]
    fn sonic_needs_close_confirmation() {
        // Rising stack but the last close dumped below the fast EMA: "side".
        let mut closes: Vec<f64> = (1..=200).map(|x| x as f64).collect();
        *closes.last_mut().unwrap() = 100.0;
        assert_eq!(sonic_trend(&closes), None);
    }
}
