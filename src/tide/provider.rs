// =============================================================================
// Tide & moon provider — astronomical timing data over HTTP
// =============================================================================
//
// Two upstream services, both keyed per calendar date and cached in-process:
//   - tide extremes (high/low water instants) for the configured station
//   - moon phase label and integer illumination percent
//
// Provider timestamps are UTC instants. A day with zero extremes is a valid
// (cached) response; the gate reports it as NO_TIDE_DATA. Network failures
// surface as errors so callers can distinguish "no data" from "fetch broke".
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::types::TideKind;

/// One tide extreme. The instant is the window center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TideEvent {
    pub kind: TideKind,
    pub center_ts: DateTime<Utc>,
}

/// Moon snapshot for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoonInfo {
    pub phase_label: String,
    pub illumination_pct: u8,
}

/// HTTP client for the tide-extremes and astronomy endpoints with a per-date
/// cache. Cheap to clone.
#[derive(Clone)]
pub struct TideMoonProvider {
    client: reqwest::Client,
    tide_base_url: String,
    astro_base_url: String,
    tide_key: String,
    astro_key: String,
    lat: f64,
    lon: f64,
    tide_cache: std::sync::Arc<Mutex<HashMap<NaiveDate, Vec<TideEvent>>>>,
    moon_cache: std::sync::Arc<Mutex<HashMap<NaiveDate, MoonInfo>>>,
}

impl TideMoonProvider {
    pub fn new(
        tide_base_url: impl Into<String>,
        astro_base_url: impl Into<String>,
        tide_key: impl Into<String>,
        astro_key: impl Into<String>,
        lat: f64,
        lon: f64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            tide_base_url: tide_base_url.into(),
            astro_base_url: astro_base_url.into(),
            tide_key: tide_key.into(),
            astro_key: astro_key.into(),
            lat,
            lon,
            tide_cache: std::sync::Arc::new(Mutex::new(HashMap::new())),
            moon_cache: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Tide extremes for `date` (UTC calendar day), cached after first fetch.
    #[instrument(skip(self), name = "tide::events")]
    pub async fn tide_events(&self, date: NaiveDate) -> Result<Vec<TideEvent>> {
        if let Some(cached) = self.tide_cache.lock().get(&date) {
            return Ok(cached.clone());
        }

        let url = format!(
            "{}/v3?extremes&date={}&lat={}&lon={}&key={}",
            self.tide_base_url,
            date.format("%Y-%m-%d"),
            self.lat,
            self.lon,
            self.tide_key
        );

        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("tide extremes request failed")?
            .json()
            .await
            .context("failed to parse tide extremes response")?;

        let events = parse_extremes(&body);
        debug!(date = %date, count = events.len(), "tide extremes fetched");

        self.tide_cache.lock().insert(date, events.clone());
        Ok(events)
    }

    /// Moon phase and illumination for `date`, cached after first fetch.
    #[instrument(skip(self), name = "tide::moon")]
    pub async fn moon_info(&self, date: NaiveDate) -> Result<MoonInfo> {
        if let Some(cached) = self.moon_cache.lock().get(&date) {
            return Ok(cached.clone());
        }

        let url = format!(
            "{}/v1/astronomy.json?key={}&q={},{}&dt={}",
            self.astro_base_url,
            self.astro_key,
            self.lat,
            self.lon,
            date.format("%Y-%m-%d")
        );

        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("astronomy request failed")?
            .json()
            .await
            .context("failed to parse astronomy response")?;

        let info = parse_astronomy(&body)
            .context("astronomy response missing moon phase or illumination")?;
        debug!(date = %date, phase = %info.phase_label, illum = info.illumination_pct, "moon info fetched");

        self.moon_cache.lock().insert(date, info.clone());
        Ok(info)
    }

    /// The tide extreme nearest to `now`, searching the surrounding three
    /// calendar days so centers close to midnight resolve correctly.
    pub async fn nearest_event(&self, now: DateTime<Utc>) -> Result<Option<TideEvent>> {
        let today = now.date_naive();
        let mut events = Vec::new();
        for offset in [-1i64, 0, 1] {
            let date = today + chrono::Duration::days(offset);
            match self.tide_events(date).await {
                Ok(mut day_events) => events.append(&mut day_events),
                // One bad day does not break the search as long as another
                // produced events.
                Err(e) => warn!(date = %date, error = %e, "tide day fetch failed"),
            }
        }

        if events.is_empty() {
            return Ok(None);
        }

        Ok(events
            .into_iter()
            .min_by_key(|e| (now - e.center_ts).num_seconds().abs()))
    }
}

/// Parse a WorldTides-style extremes payload:
/// `{"extremes": [{"dt": <epoch sec>, "type": "High"|"Low"}, ...]}`.
pub fn parse_extremes(body: &serde_json::Value) -> Vec<TideEvent> {
    let Some(raw) = body.get("extremes").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut events = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(dt) = entry.get("dt").and_then(|v| v.as_i64()) else {
            warn!("skipping extreme without dt");
            continue;
        };
        let kind = match entry.get("type").and_then(|v| v.as_str()) {
            Some(t) if t.eq_ignore_ascii_case("high") => TideKind::High,
            Some(t) if t.eq_ignore_ascii_case("low") => TideKind::Low,
            other => {
                warn!(kind = ?other, "skipping extreme with unknown type");
                continue;
            }
        };
        let Some(center_ts) = Utc.timestamp_opt(dt, 0).single() else {
            warn!(dt, "skipping extreme with out-of-range timestamp");
            continue;
        };
        events.push(TideEvent { kind, center_ts });
    }
    events
}

/// Parse a WeatherAPI-style astronomy payload:
/// `{"astronomy": {"astro": {"moon_phase": "...", "moon_illumination": 62}}}`.
///
/// Illumination arrives as either a number or a numeric string depending on
/// API version; both are accepted.
pub fn parse_astronomy(body: &serde_json::Value) -> Option<MoonInfo> {
    let astro = body.get("astronomy")?.get("astro")?;
    let phase_label = astro.get("moon_phase")?.as_str()?.to_string();
    let illum = astro.get("moon_illumination")?;
    let illumination_pct = match illum {
        serde_json::Value::Number(n) => n.as_f64()? as i64,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Some(MoonInfo {
        phase_label,
        illumination_pct: illumination_pct.clamp(0, 100) as u8,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_extremes_payload() {
        let body = json!({
            "extremes": [
                {"dt": 1735722000, "type": "High", "height": 1.2},
                {"dt": 1735744500, "type": "Low", "height": -0.8}
            ]
        });
        let events = parse_extremes(&body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, TideKind::High);
        assert_eq!(events[0].center_ts.timestamp(), 1735722000);
        assert_eq!(events[1].kind, TideKind::Low);
    }

    #[test]
    fn extremes_skips_malformed_entries() {
        let body = json!({
            "extremes": [
                {"type": "High"},
                {"dt": 1735722000, "type": "Slack"},
                {"dt": 1735744500, "type": "low"}
            ]
        });
        let events = parse_extremes(&body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TideKind::Low);
    }

    #[test]
    fn extremes_missing_key_is_empty() {
        assert!(parse_extremes(&json!({"status": 400})).is_empty());
    }

    #[test]
    fn parses_astronomy_with_string_illumination() {
        let body = json!({
            "astronomy": {"astro": {"moon_phase": "Waxing Gibbous", "moon_illumination": "62"}}
        });
        let info = parse_astronomy(&body).unwrap();
        assert_eq!(info.phase_label, "Waxing Gibbous");
        assert_eq!(info.illumination_pct, 62);
    }

    #[test]
    fn parses_astronomy_with_numeric_illumination() {
        let body = json!({
            "astronomy": {"astro": {"moon_phase": "Full Moon", "moon_illumination": 100}}
        });
        let info = parse_astronomy(&body).unwrap();
        assert_eq!(info.illumination_pct, 100);
    }

    #[test]
    fn astronomy_missing_fields_is_none() {
        assert!(parse_astronomy(&json!({})).is_none());
        assert!(parse_astronomy(&json!({"astronomy": {"astro": {"moon_phase": "New Moon"}}})).is_none());
    }

    #[test]
    fn astronomy_illumination_clamped() {
        let body = json!({
            "astronomy": {"astro": {"moon_phase": "X", "moon_illumination": "150"}}
        });
        assert_eq!(parse_astronomy(&body).unwrap().illumination_pct, 100);
    }
}
