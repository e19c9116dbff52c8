// =============================================================================
// Exchange adapter boundary
// =============================================================================
//
// The execute hub and the TP monitor speak to exchanges through one
// side-agnostic surface: LONG/SHORT is normalized to BUY/SELL here and
// nowhere else. Two implementations exist — the signed futures REST client
// and the paper client used by demo accounts — dispatched statically through
// `ExchangeClient`.
// =============================================================================

pub mod futures_client;
pub mod paper;

pub use futures_client::FuturesRestClient;
pub use paper::PaperClient;

use anyhow::Result;
use serde::Serialize;

use crate::types::Side;

/// A live position as reported by the exchange.
#[derive(Debug, Clone, Serialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub entry_price: f64,
}

/// One exchange client, live or simulated.
#[derive(Clone)]
pub enum ExchangeClient {
    Rest(FuturesRestClient),
    Paper(PaperClient),
}

impl ExchangeClient {
    /// Place a market entry with protective stop-loss and take-profit
    /// orders. Returns the entry order id.
    pub async fn open_market(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        sl: f64,
        tp: f64,
    ) -> Result<String> {
        match self {
            Self::Rest(c) => c.open_market(symbol, side, qty, sl, tp).await,
            Self::Paper(c) => c.open_market(symbol, side, qty, sl, tp),
        }
    }

    /// Close `pct` percent of the position. With a side filter only that
    /// hedge side is closed; otherwise the net position is.
    pub async fn close_position(
        &self,
        symbol: &str,
        pct: f64,
        side_filter: Option<Side>,
    ) -> Result<()> {
        match self {
            Self::Rest(c) => c.close_position(symbol, pct, side_filter).await,
            Self::Paper(c) => c.close_position(symbol, pct, side_filter),
        }
    }

    /// The current position, if any.
    pub async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        match self {
            Self::Rest(c) => c.fetch_position(symbol).await,
            Self::Paper(c) => c.fetch_position(symbol).await,
        }
    }

    /// Last traded price.
    pub async fn fetch_ticker(&self, symbol: &str) -> Result<f64> {
        match self {
            Self::Rest(c) => c.fetch_ticker(symbol).await,
            Self::Paper(c) => c.fetch_ticker(symbol).await,
        }
    }

    /// Set the account leverage for `symbol`. Best-effort on paper.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        match self {
            Self::Rest(c) => c.set_leverage(symbol, leverage).await,
            Self::Paper(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rest(_) => write!(f, "ExchangeClient::Rest"),
            Self::Paper(_) => write!(f, "ExchangeClient::Paper"),
        }
    }
}
