// =============================================================================
// Paper client — simulated fills for demo accounts
// =============================================================================
//
// Keeps positions in-process and marks them against real market prices from
// the kline endpoint. When a query observes that the price has crossed the
// stored stop or target since entry, the position is flattened, so the TP
// monitor sees the same "flat before deadline" shape it would on a live
// account.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::exchange::PositionInfo;
use crate::market_data::KlineFetcher;
use crate::types::Side;

#[derive(Debug, Clone)]
struct PaperPosition {
    side: Side,
    qty: f64,
    entry_price: f64,
    sl: f64,
    tp: f64,
}

/// Simulated exchange account.
#[derive(Clone)]
pub struct PaperClient {
    fetcher: KlineFetcher,
    positions: Arc<Mutex<HashMap<String, PaperPosition>>>,
}

impl PaperClient {
    pub fn new(fetcher: KlineFetcher) -> Self {
        Self {
            fetcher,
            positions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Synthetic market fill at the current reference price. The entry price
    /// is refined on the next query; opening never blocks on a fetch.
    pub fn open_market(&self, symbol: &str, side: Side, qty: f64, sl: f64, tp: f64) -> Result<String> {
        let order_id = format!("paper-{}", Uuid::new_v4());
        self.positions.lock().insert(
            symbol.to_string(),
            PaperPosition {
                side,
                qty,
                entry_price: 0.0,
                sl,
                tp,
            },
        );
        info!(symbol, %side, qty, sl, tp, order_id = %order_id, "paper fill");
        Ok(order_id)
    }

    pub fn close_position(&self, symbol: &str, pct: f64, side_filter: Option<Side>) -> Result<()> {
        let mut positions = self.positions.lock();
        let Some(pos) = positions.get_mut(symbol) else {
            return Ok(());
        };
        if let Some(filter) = side_filter {
            if pos.side != filter {
                return Ok(());
            }
        }
        let fraction = pct.clamp(0.0, 100.0) / 100.0;
        pos.qty *= 1.0 - fraction;
        if pos.qty <= f64::EPSILON || fraction >= 1.0 {
            positions.remove(symbol);
            debug!(symbol, "paper position fully closed");
        }
        Ok(())
    }

    /// Current paper position, flattening it first if the live price has
    /// crossed the stored stop or target.
    pub async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        let snapshot = self.positions.lock().get(symbol).cloned();
        let Some(mut pos) = snapshot else {
            return Ok(None);
        };

        let price = self.fetch_ticker(symbol).await?;
        if pos.entry_price == 0.0 {
            pos.entry_price = price;
            if let Some(stored) = self.positions.lock().get_mut(symbol) {
                stored.entry_price = price;
            }
        }

        let exited = match pos.side {
            Side::Long => price <= pos.sl || price >= pos.tp,
            Side::Short => price >= pos.sl || price <= pos.tp,
        };
        if exited {
            self.positions.lock().remove(symbol);
            info!(symbol, price, sl = pos.sl, tp = pos.tp, "paper position hit protective level");
            return Ok(None);
        }

        Ok(Some(PositionInfo {
            symbol: symbol.to_string(),
            side: pos.side,
            qty: pos.qty,
            entry_price: pos.entry_price,
        }))
    }

    /// Last close of the most recent M5 bar stands in for the ticker.
    pub async fn fetch_ticker(&self, symbol: &str) -> Result<f64> {
        let candles = self.fetcher.fetch(symbol, "5m", 2).await;
        candles
            .last()
            .map(|c| c.close)
            .context("no recent candle for paper ticker")
    }
}

impl std::fmt::Debug for PaperClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperClient")
            .field("open_positions", &self.positions.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PaperClient {
        PaperClient::new(KlineFetcher::new("http://localhost:1"))
    }

    #[test]
    fn open_then_partial_close_reduces_qty() {
        let c = client();
        c.open_market("BTCUSDT", Side::Long, 1.0, 95.0, 110.0).unwrap();
        c.close_position("BTCUSDT", 50.0, None).unwrap();
        let positions = c.positions.lock();
        assert!((positions.get("BTCUSDT").unwrap().qty - 0.5).abs() < 1e-12);
    }

    #[test]
    fn full_close_removes_position() {
        let c = client();
        c.open_market("BTCUSDT", Side::Short, 2.0, 110.0, 90.0).unwrap();
        c.close_position("BTCUSDT", 100.0, None).unwrap();
        assert!(c.positions.lock().is_empty());
    }

    #[test]
    fn side_filter_excludes_other_side() {
        let c = client();
        c.open_market("BTCUSDT", Side::Long, 1.0, 95.0, 110.0).unwrap();
        c.close_position("BTCUSDT", 100.0, Some(Side::Short)).unwrap();
        assert_eq!(c.positions.lock().len(), 1);
    }

    #[test]
    fn close_without_position_is_noop() {
        let c = client();
        assert!(c.close_position("ETHUSDT", 100.0, None).is_ok());
    }
}
