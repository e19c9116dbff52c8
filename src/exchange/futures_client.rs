// =============================================================================
// Futures REST client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. All signed requests
// carry X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift against the exchange.
//
// An entry is three orders: the MARKET entry, a STOP_MARKET stop-loss and a
// TAKE_PROFIT_MARKET target, both flagged closePosition so whichever fires
// first flattens the trade and the other becomes harmless.
// =============================================================================

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::exchange::PositionInfo;
use crate::types::Side;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Production and testnet futures endpoints.
pub const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
pub const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Signed REST client for a single futures account.
#[derive(Clone)]
pub struct FuturesRestClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl FuturesRestClient {
    /// Create a client for one account. `testnet` switches the base URL.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if testnet {
            FUTURES_TESTNET_URL.to_string()
        } else {
            FUTURES_BASE_URL.to_string()
        };

        debug!(base_url = %base_url, "FuturesRestClient initialised");

        Self {
            secret,
            base_url,
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Full query string for a signed request (timestamp, recvWindow,
    /// signature appended).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// Issue a signed request and decode the JSON body, surfacing non-2xx
    /// responses as errors with the exchange's payload attached.
    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &str,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params));
        let resp = self
            .client
            .request(method.clone(), &url)
            .send()
            .await
            .with_context(|| format!("{method} {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("{path} returned {}: {}", status, body);
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<serde_json::Value> {
        self.signed_request(reqwest::Method::POST, path, params).await
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<serde_json::Value> {
        self.signed_request(reqwest::Method::GET, path, params).await
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Market entry plus protective SL/TP orders. Returns the entry order id.
    ///
    /// A failure placing the protective orders is logged but does not undo
    /// the entry; the caller still holds the position.
    #[instrument(skip(self), name = "exchange::open_market")]
    pub async fn open_market(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        sl: f64,
        tp: f64,
    ) -> Result<String> {
        let entry_params = format!(
            "symbol={symbol}&side={}&type=MARKET&quantity={qty:.6}",
            side.order_side()
        );
        let entry = self.signed_post("/fapi/v1/order", &entry_params).await?;
        let entry_id = entry
            .get("orderId")
            .and_then(|v| v.as_u64())
            .map(|id| id.to_string())
            .context("entry response missing orderId")?;

        debug!(symbol, %side, qty, entry_id = %entry_id, "market entry placed");

        let exit_side = side.flip().order_side();
        let sl_params = format!(
            "symbol={symbol}&side={exit_side}&type=STOP_MARKET&stopPrice={sl:.4}&closePosition=true"
        );
        if let Err(e) = self.signed_post("/fapi/v1/order", &sl_params).await {
            warn!(symbol, error = %e, "stop-loss order placement failed");
        }

        let tp_params = format!(
            "symbol={symbol}&side={exit_side}&type=TAKE_PROFIT_MARKET&stopPrice={tp:.4}&closePosition=true"
        );
        if let Err(e) = self.signed_post("/fapi/v1/order", &tp_params).await {
            warn!(symbol, error = %e, "take-profit order placement failed");
        }

        Ok(entry_id)
    }

    /// Close `pct` percent of the current position with a reduce-only market
    /// order. With `side_filter` only a position on that side is closed.
    #[instrument(skip(self), name = "exchange::close_position")]
    pub async fn close_position(
        &self,
        symbol: &str,
        pct: f64,
        side_filter: Option<Side>,
    ) -> Result<()> {
        let Some(position) = self.fetch_position(symbol).await? else {
            debug!(symbol, "no position to close");
            return Ok(());
        };

        if let Some(filter) = side_filter {
            if position.side != filter {
                debug!(symbol, want = %filter, have = %position.side, "side filter excludes position");
                return Ok(());
            }
        }

        let close_qty = position.qty * (pct.clamp(0.0, 100.0) / 100.0);
        if close_qty <= 0.0 {
            return Ok(());
        }

        let params = format!(
            "symbol={symbol}&side={}&type=MARKET&quantity={close_qty:.6}&reduceOnly=true",
            position.side.flip().order_side()
        );
        self.signed_post("/fapi/v1/order", &params).await?;

        debug!(symbol, pct, close_qty, "position close submitted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Current position for `symbol`, or `None` when flat.
    #[instrument(skip(self), name = "exchange::fetch_position")]
    pub async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        let body = self
            .signed_get("/fapi/v2/positionRisk", &format!("symbol={symbol}"))
            .await?;

        let rows = body
            .as_array()
            .context("positionRisk response is not an array")?;

        for row in rows {
            let amt: f64 = row
                .get("positionAmt")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            if amt == 0.0 {
                continue;
            }
            let entry_price: f64 = row
                .get("entryPrice")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            return Ok(Some(PositionInfo {
                symbol: symbol.to_string(),
                side: if amt > 0.0 { Side::Long } else { Side::Short },
                qty: amt.abs(),
                entry_price,
            }));
        }

        Ok(None)
    }

    /// Last traded price from the public ticker endpoint.
    #[instrument(skip(self), name = "exchange::fetch_ticker")]
    pub async fn fetch_ticker(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("ticker request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse ticker response")?;

        if !status.is_success() {
            anyhow::bail!("ticker returned {}: {}", status, body);
        }

        body.get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .context("ticker response missing price")
    }

    /// Set account leverage for `symbol`.
    #[instrument(skip(self), name = "exchange::set_leverage")]
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.signed_post(
            "/fapi/v1/leverage",
            &format!("symbol={symbol}&leverage={leverage}"),
        )
        .await?;
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }
}

impl std::fmt::Debug for FuturesRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesRestClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let client = FuturesRestClient::new("key", "secret", false);
        let sig1 = client.sign("symbol=BTCUSDT&side=BUY");
        let sig2 = client.sign("symbol=BTCUSDT&side=BUY");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_payloads_different_signatures() {
        let client = FuturesRestClient::new("key", "secret", false);
        assert_ne!(client.sign("a=1"), client.sign("a=2"));
    }

    #[test]
    fn testnet_flag_switches_base_url() {
        let live = FuturesRestClient::new("k", "s", false);
        let test = FuturesRestClient::new("k", "s", true);
        assert_eq!(live.base_url, FUTURES_BASE_URL);
        assert_eq!(test.base_url, FUTURES_TESTNET_URL);
    }

    #[test]
    fn signed_query_carries_signature_and_recv_window() {
        let client = FuturesRestClient::new("k", "s", false);
        let qs = client.signed_query("symbol=BTCUSDT");
        assert!(qs.starts_with("symbol=BTCUSDT&timestamp="));
        assert!(qs.contains("recvWindow=5000"));
        assert!(qs.contains("&signature="));
    }
}
