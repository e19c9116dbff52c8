// =============================================================================
// Multi-timeframe scorer — H4/M30 aggregation with moon and synergy
// =============================================================================
//
// The scorer reduces the H4 and M30 frames (plus the M5 gate frame) to a
// single evaluation:
//
//   total = score(H4) + score(M30) + moon_signed + synergy
//
// Desired-side selection, in order:
//   1. H4 leads when directional and M30 does not oppose it.
//   2. Near-align: total above the floor, the two frames within the gap, and
//      not mutually strong opposites — the higher-magnitude side wins.
//   3. M30 takeover when its score clears the takeover floor.
//   4. Otherwise no signal.
//
// The extreme block then refuses entries into exhaustion (boundary
// inclusive), and the M5 gate result is attached for the decision pipeline's
// final check.
// =============================================================================

pub mod m5;
pub mod moon;
pub mod timeframe;
pub mod zones;

pub use m5::{m5_gate, M5GateResult};
pub use moon::{moon_score, MoonScore};
pub use timeframe::{score_timeframe, TfScore, Timeframe};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine_config::EngineConfig;
use crate::indicators::IndicatorFrame;
use crate::market_data::KlineFetcher;
use crate::tide::provider::TideMoonProvider;
use crate::timeutil::local_offset;
use crate::types::{market_symbol, Side};

/// Why the scorer produced no tradeable signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreSkip {
    /// Market data missing or too short for the indicator stack.
    BadReport,
    /// No side survived aggregation.
    NoSignal,
    /// The extreme block refused an exhaustion entry.
    ExtremeBlock,
}

impl ScoreSkip {
    /// Stable tag surfaced to users and asserted by tests.
    pub fn tag(self) -> &'static str {
        match self {
            Self::BadReport => "bad_report",
            Self::NoSignal => "no_signal",
            Self::ExtremeBlock => "report_skip",
        }
    }
}

/// Per-timeframe frames plus the gate/moon context of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct FrameSet {
    pub h4: TfScore,
    pub m30: TfScore,
    pub m5: Option<M5GateResult>,
    pub moon: Option<MoonScore>,
}

/// Full result of one scorer run.
#[derive(Debug, Clone, Serialize)]
pub struct EvalResult {
    pub ok: bool,
    pub skip: Option<ScoreSkip>,
    pub signal: Option<Side>,
    /// Rounded total score.
    pub confidence: i64,
    pub frames: Option<FrameSet>,
    /// Human-readable report block attached to notifications.
    pub text: String,
}

impl EvalResult {
    fn data_skip(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            skip: Some(ScoreSkip::BadReport),
            signal: None,
            confidence: 0,
            frames: None,
            text: text.into(),
        }
    }
}

/// Outcome of the aggregation rules.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Aggregate {
    pub desired: Option<Side>,
    pub total: f64,
    pub synergy: f64,
    pub moon_signed: f64,
    /// Which rule selected the side.
    pub rule: &'static str,
}

/// Run the desired-side selection over the two HTF frames.
pub fn aggregate(
    h4: &TfScore,
    m30: &TfScore,
    moon: Option<&MoonScore>,
    cfg: &EngineConfig,
) -> Aggregate {
    let provisional = h4.side.or(m30.side);
    let moon_signed = match (provisional, moon) {
        (Some(side), Some(m)) => m.signed_for(side),
        _ => 0.0,
    };

    let synergy = if cfg.synergy_on
        && h4.side.is_some()
        && h4.side == m30.side
    {
        cfg.synergy_bonus
    } else {
        0.0
    };

    let total = h4.score + m30.score + moon_signed + synergy;

    // Rule 1 — H4 leads when M30 agrees or abstains.
    if let Some(h4_side) = h4.side {
        if m30.side.is_none() || m30.side == Some(h4_side) {
            return Aggregate {
                desired: Some(h4_side),
                total,
                synergy,
                moon_signed,
                rule: "h4_lead",
            };
        }
    }

    // Rule 2 — near-align: close scores, decent total, no hard conflict.
    if cfg.htf_near_align {
        let strong_opposites = matches!(
            (h4.side, m30.side),
            (Some(a), Some(b)) if a != b
        ) && h4.score >= cfg.m30_takeover_min
            && m30.score >= cfg.m30_takeover_min;

        if total >= cfg.htf_min_align_score
            && (h4.score - m30.score).abs() <= cfg.htf_near_align_gap
            && !strong_opposites
        {
            let winner = if h4.score >= m30.score { h4.side } else { m30.side };
            if winner.is_some() {
                return Aggregate {
                    desired: winner,
                    total,
                    synergy,
                    moon_signed,
                    rule: "near_align",
                };
            }
        }
    }

    // Rule 3 — M30 takeover.
    if let Some(m30_side) = m30.side {
        if m30.score >= cfg.m30_takeover_min {
            return Aggregate {
                desired: Some(m30_side),
                total,
                synergy,
                moon_signed,
                rule: "m30_takeover",
            };
        }
    }

    Aggregate {
        desired: None,
        total,
        synergy,
        moon_signed,
        rule: "none",
    }
}

/// Exhaustion refusal: a long into overbought (or short into oversold) on
/// either HTF frame is blocked. Thresholds are inclusive.
pub fn extreme_blocked(desired: Side, h4: &TfScore, m30: &TfScore, cfg: &EngineConfig) -> bool {
    if !cfg.extreme_block_on {
        return false;
    }
    let frames = [h4, m30];
    match desired {
        Side::Long => frames.iter().any(|f| {
            f.last_rsi >= cfg.extreme_rsi_ob || f.last_stoch_d >= cfg.extreme_stoch_ob
        }),
        Side::Short => frames.iter().any(|f| {
            f.last_rsi <= cfg.extreme_rsi_os || f.last_stoch_d <= cfg.extreme_stoch_os
        }),
    }
}

fn fmt_side(side: Option<Side>) -> String {
    side.map(|s| s.to_string()).unwrap_or_else(|| "NONE".to_string())
}

fn render_tf_line(score: &TfScore) -> String {
    format!(
        "{:<3} {} {:+.2} [{}/{}] rsi {:.1} gap {:+.1} stoch {:.1} gap {:+.1}",
        score.timeframe,
        fmt_side(score.side),
        score.score,
        score.zone_rsi,
        score.zone_stoch,
        score.last_rsi,
        score.rsi_gap,
        score.last_stoch_d,
        score.stoch_gap,
    )
}

/// Render the report block reused in confirmations and skip notices.
pub fn render_report(
    pair: &str,
    agg: &Aggregate,
    frames: &FrameSet,
    skip: Option<ScoreSkip>,
) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} | signal {} | total {:+.2}",
        pair,
        fmt_side(agg.desired),
        agg.total
    ));
    lines.push(render_tf_line(&frames.h4));
    lines.push(render_tf_line(&frames.m30));
    if let Some(m5) = &frames.m5 {
        lines.push(format!(
            "M5  {} {}",
            if m5.pass { "pass" } else { "fail" },
            m5.detail
        ));
    }
    if let Some(moon) = &frames.moon {
        lines.push(format!(
            "MOON {} {} {} {}% {:+.2}",
            moon.preset,
            moon.stage,
            moon.anchor,
            moon.illumination_pct,
            agg.moon_signed
        ));
    }
    if agg.synergy > 0.0 {
        lines.push(format!("SYNERGY {:+.2}", agg.synergy));
    }
    if let Some(skip) = skip {
        lines.push(format!("SKIP {}", skip.tag()));
    }
    lines.join("\n")
}

// =============================================================================
// Scorer
// =============================================================================

/// Kline limits per timeframe. H4/M30 need the full EMA89 stack; M5 only the
/// RSI/Stoch chain plus volume MA.
const HTF_KLINE_LIMIT: u32 = 200;
const M5_KLINE_LIMIT: u32 = 150;

/// The multi-timeframe scorer. Owns the kline fetcher and the tide/moon
/// provider; evaluation is stateless per call.
#[derive(Clone)]
pub struct Scorer {
    fetcher: KlineFetcher,
    provider: TideMoonProvider,
}

impl Scorer {
    pub fn new(fetcher: KlineFetcher, provider: TideMoonProvider) -> Self {
        Self { fetcher, provider }
    }

    /// Evaluate `pair` at `now` under `cfg`.
    pub async fn evaluate(&self, cfg: &EngineConfig, pair: &str, now: DateTime<Utc>) -> EvalResult {
        let symbol = market_symbol(pair);

        let h4_candles = self
            .fetcher
            .fetch(&symbol, Timeframe::H4.interval(), HTF_KLINE_LIMIT)
            .await;
        let m30_candles = self
            .fetcher
            .fetch(&symbol, Timeframe::M30.interval(), HTF_KLINE_LIMIT)
            .await;
        let m5_candles = self
            .fetcher
            .fetch(&symbol, Timeframe::M5.interval(), M5_KLINE_LIMIT)
            .await;

        let Some(h4_frame) = IndicatorFrame::compute(&h4_candles) else {
            return EvalResult::data_skip(format!("{pair}: H4 data insufficient"));
        };
        let Some(m30_frame) = IndicatorFrame::compute(&m30_candles) else {
            return EvalResult::data_skip(format!("{pair}: M30 data insufficient"));
        };
        let Some(m5_frame) = IndicatorFrame::compute(&m5_candles) else {
            return EvalResult::data_skip(format!("{pair}: M5 data insufficient"));
        };

        let h4 = score_timeframe(Timeframe::H4, &h4_frame, cfg);
        let m30 = score_timeframe(Timeframe::M30, &m30_frame, cfg);

        // Moon failures degrade to "no bonus", never to a skipped tick.
        let today = now.with_timezone(&local_offset(cfg.local_tz_offset_hours)).date_naive();
        let moon = match (
            self.provider.moon_info(today).await,
            self.provider.moon_info(today - chrono::Duration::days(1)).await,
        ) {
            (Ok(t), Ok(y)) => Some(moon_score(&t, &y)),
            (t, y) => {
                warn!(
                    today_err = t.is_err(),
                    yesterday_err = y.is_err(),
                    "moon info unavailable — scoring without bonus"
                );
                None
            }
        };

        let agg = aggregate(&h4, &m30, moon.as_ref(), cfg);
        debug!(pair, rule = agg.rule, total = agg.total, "aggregation complete");

        let Some(desired) = agg.desired else {
            let frames = FrameSet { h4, m30, m5: None, moon };
            let text = render_report(pair, &agg, &frames, Some(ScoreSkip::NoSignal));
            return EvalResult {
                ok: false,
                skip: Some(ScoreSkip::NoSignal),
                signal: None,
                confidence: agg.total.round() as i64,
                frames: Some(frames),
                text,
            };
        };

        if extreme_blocked(desired, &h4, &m30, cfg) {
            let frames = FrameSet { h4, m30, m5: None, moon };
            let text = render_report(pair, &agg, &frames, Some(ScoreSkip::ExtremeBlock));
            return EvalResult {
                ok: false,
                skip: Some(ScoreSkip::ExtremeBlock),
                signal: Some(desired),
                confidence: agg.total.round() as i64,
                frames: Some(frames),
                text,
            };
        }

        let m5 = m5_gate(desired, &m5_candles, &m5_frame, cfg);
        let frames = FrameSet {
            h4,
            m30,
            m5: Some(m5),
            moon,
        };
        let text = render_report(pair, &agg, &frames, None);

        EvalResult {
            ok: true,
            skip: None,
            signal: Some(desired),
            confidence: agg.total.round() as i64,
            frames: Some(frames),
            text,
        }
    }
}
