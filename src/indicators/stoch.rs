// =============================================================================
// Stochastic Oscillator — %K, %D and SlowD
// =============================================================================
//
//   %K_t  = 100 * (close_t - LL_14) / (HH_14 - LL_14)
//   %D    = SMA_3(%K)
//   SlowD = SMA_3(%D)
//
// where LL/HH are the lowest low / highest high over the %K window. A bar
// with zero range (HH == LL) reads 50 — no directional information.
// =============================================================================

/// Raw %K series over `(high, low, close)` with the given window.
///
/// One value per bar starting at index `window - 1`. The three slices must
/// have equal length; mismatched inputs yield an empty series.
pub fn stoch_k(high: &[f64], low: &[f64], close: &[f64], window: usize) -> Vec<f64> {
    if window == 0
        || high.len() != low.len()
        || low.len() != close.len()
        || close.len() < window
    {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(close.len() - window + 1);

    for i in (window - 1)..close.len() {
        let lo = low[i + 1 - window..=i]
            .iter()
            .fold(f64::INFINITY, |a, &b| a.min(b));
        let hi = high[i + 1 - window..=i]
            .iter()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        let range = hi - lo;
        let k = if range > 0.0 {
            100.0 * (close[i] - lo) / range
        } else {
            50.0
        };

        if !k.is_finite() {
            break;
        }
        result.push(k.clamp(0.0, 100.0));
    }

    result
}

/// Simple moving average, one value per input starting at index `period - 1`.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(values.len() - period + 1);
    let mut sum: f64 = values[..period].iter().sum();
    result.push(sum / period as f64);

    for i in period..values.len() {
        sum += values[i] - values[i - period];
        result.push(sum / period as f64);
    }

    result
}
