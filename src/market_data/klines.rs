// =============================================================================
// Kline fetcher — closed-bar OHLCV frames over REST
// =============================================================================
//
// Fetches candles from a Binance-style /api/v3/klines endpoint and returns
// them oldest-first with the in-progress bar removed, so every indicator
// downstream computes on closed bars only.
//
// Transient failures are retried up to three times with a linear backoff of
// 0.6 * attempt seconds. After the final failure an empty frame is returned;
// the scorer surfaces that as insufficient data. The fetcher never panics on
// provider garbage — malformed rows are skipped with a warning.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// A single closed OHLCV candle. Times are epoch milliseconds (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Retry attempts before giving up on a fetch.
const MAX_ATTEMPTS: u32 = 3;

/// Backoff step in milliseconds; the n-th retry waits `n * BACKOFF_STEP_MS`.
const BACKOFF_STEP_MS: u64 = 600;

/// REST client for the kline endpoint. Cheap to clone; the underlying
/// connection pool is shared.
#[derive(Clone)]
pub struct KlineFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl KlineFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Fetch up to `limit` closed candles for `(symbol, interval)`.
    ///
    /// Returns an empty vec when the provider keeps failing or responds with
    /// garbage — callers treat that as "insufficient data", not an error.
    #[instrument(skip(self), name = "klines::fetch")]
    pub async fn fetch(&self, symbol: &str, interval: &str, limit: u32) -> Vec<Candle> {
        let now_ms = chrono::Utc::now().timestamp_millis();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_once(symbol, interval, limit).await {
                Ok(body) => {
                    let candles = parse_klines(&body, now_ms);
                    debug!(symbol, interval, count = candles.len(), "klines fetched");
                    return candles;
                }
                Err(e) => {
                    warn!(symbol, interval, attempt, error = %e, "kline fetch failed");
                    if attempt < MAX_ATTEMPTS {
                        let backoff = BACKOFF_STEP_MS * attempt as u64;
                        tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        warn!(symbol, interval, "kline fetch exhausted retries — returning empty frame");
        Vec::new()
    }

    async fn fetch_once(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<serde_json::Value> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("kline endpoint returned {}: {}", status, body);
        }

        Ok(body)
    }
}

/// Parse the array-of-arrays kline payload, dropping the in-progress bar.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
///   [6] closeTime, remaining columns ignored.
///
/// A bar whose close time lies beyond `now_ms` has not closed yet and is
/// removed from the tail.
pub fn parse_klines(body: &serde_json::Value, now_ms: i64) -> Vec<Candle> {
    let Some(raw) = body.as_array() else {
        warn!("klines response is not an array");
        return Vec::new();
    };

    let mut candles = Vec::with_capacity(raw.len());

    for entry in raw {
        let Some(arr) = entry.as_array() else {
            warn!("skipping non-array kline entry");
            continue;
        };
        if arr.len() < 7 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time = arr[0].as_i64().unwrap_or(0);
        let close_time = arr[6].as_i64().unwrap_or(0);
        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            numeric(&arr[1]),
            numeric(&arr[2]),
            numeric(&arr[3]),
            numeric(&arr[4]),
            numeric(&arr[5]),
        ) else {
            warn!("skipping kline entry with unparsable fields");
            continue;
        };

        candles.push(Candle {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    // Closed-bar semantics: the exchange includes the live candle as the last
    // row; its close time is still in the future.
    while candles
        .last()
        .map(|c| c.close_time > now_ms)
        .unwrap_or(false)
    {
        candles.pop();
    }

    candles
}

/// Binance serialises floats as strings; accept both forms.
fn numeric(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
