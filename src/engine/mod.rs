// =============================================================================
// Engine — decision pipeline, execution, sentinel, monitor, scheduler
// =============================================================================

pub mod approval;
pub mod decision;
pub mod executor;
pub mod monitor;
pub mod scheduler;
pub mod sentinel;
pub mod state;

pub use state::EngineState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// A position opened by the execute hub, tracked until the TP monitor (or an
/// external close) clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub pair: String,
    pub side: Side,
    pub qty: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Center of the tide window the entry belonged to, when known.
    pub tide_center: Option<DateTime<Utc>>,
    pub sl_price: f64,
    pub tp_price: f64,
    /// True when every filled account was simulated.
    pub simulated: bool,
    pub window_key: String,
    /// Account names that filled, in attempt order.
    pub source_accounts: Vec<String>,
}

impl OpenPosition {
    /// Deadline of the time-based exit: tide center when known, else the
    /// entry time, plus the configured horizon.
    pub fn tp_deadline(&self, tp_time_hours: f64) -> DateTime<Utc> {
        let base = self.tide_center.unwrap_or(self.entry_time);
        base + chrono::Duration::milliseconds((tp_time_hours * 3_600_000.0) as i64)
    }
}

/// A recorded error event for the status API's error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn position(tide_center: Option<DateTime<Utc>>) -> OpenPosition {
        OpenPosition {
            pair: "BTC/USDT".into(),
            side: Side::Long,
            qty: 0.01,
            entry_price: 30000.0,
            entry_time: Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap(),
            tide_center,
            sl_price: 29659.0,
            tp_price: 30443.0,
            simulated: true,
            window_key: "20250101T0900-HIGH".into(),
            source_accounts: vec!["alpha".into()],
        }
    }

    #[test]
    fn deadline_from_tide_center_when_known() {
        let center = Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap();
        let pos = position(Some(center));
        let deadline = pos.tp_deadline(4.0);
        assert_eq!(deadline, Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn deadline_falls_back_to_entry_time() {
        let pos = position(None);
        let deadline = pos.tp_deadline(2.5);
        assert_eq!(deadline, Utc.with_ymd_and_hms(2025, 1, 1, 5, 30, 0).unwrap());
    }
}
