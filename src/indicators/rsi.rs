// =============================================================================
// Relative Strength Index (RSI) — Wilder's smoothing
// =============================================================================
//
// Up-moves and down-moves are averaged separately: seeded with the simple
// mean of the first `period` deltas, then smoothed as
//
//   avg = (prev_avg * (period - 1) + current) / period
//
// and combined into RSI = 100 - 100 / (1 + avg_up / avg_down).
// =============================================================================

/// Wilder running averages of up- and down-moves.
struct WilderState {
    up: f64,
    down: f64,
    period: f64,
}

impl WilderState {
    /// Seed from the first `period` deltas (their simple means).
    fn seed(deltas: &[f64], period: usize) -> Self {
        let mut up_sum = 0.0;
        let mut down_sum = 0.0;
        for &d in &deltas[..period] {
            if d > 0.0 {
                up_sum += d;
            } else {
                down_sum -= d;
            }
        }
        let period = period as f64;
        Self {
            up: up_sum / period,
            down: down_sum / period,
            period,
        }
    }

    /// Fold one more delta into the running averages.
    fn advance(&mut self, delta: f64) {
        let up = delta.max(0.0);
        let down = (-delta).max(0.0);
        self.up = (self.up * (self.period - 1.0) + up) / self.period;
        self.down = (self.down * (self.period - 1.0) + down) / self.period;
    }

    /// RSI in [0, 100]; `None` when the value degenerates to non-finite.
    ///
    /// No down-moves at all clamps to 100; a completely flat market (no
    /// moves either way) reads as neutral 50.
    fn value(&self) -> Option<f64> {
        let rsi = if self.down == 0.0 {
            if self.up == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + self.up / self.down)
        };
        rsi.is_finite().then_some(rsi)
    }
}

/// Compute the RSI series for `closes` with the given `period`.
///
/// One value per close starting at index `period` (the first `period` closes
/// seed the averages). Too little data or a zero period yields an empty
/// series; a non-finite value truncates it.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let mut state = WilderState::seed(&deltas, period);

    let Some(first) = state.value() else {
        return Vec::new();
    };

    let mut series = Vec::with_capacity(deltas.len() - period + 1);
    series.push(first);

    for &delta in &deltas[period..] {
        state.advance(delta);
        match state.value() {
            Some(v) => series.push(v),
            None => break,
        }
    }

    series
}
