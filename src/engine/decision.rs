// =============================================================================
// Decision Pipeline (A) — per-user, per-M5-close evaluation
// =============================================================================
//
// Runs once per user per scheduler tick and either produces a `Go` bundle
// for the tide gate / execute hub, or a skip with a stable reason tag.
// Steps, short-circuiting on the first skip:
//
//   1. auto-enabled flag            6. M30 flip-guard
//   2. risk-sentinel lock           7. desired-vs-M30 enforcement
//   3. M5-close acceptance + slot   8. M5 gate
//      de-dup (marker set BEFORE    9. spacing & second-entry retrace
//      the first await)
//   4. scorer
//   5. nearest tide center / tau
//
// The slot marker in step 3 is what makes re-running the same M5 slot a
// no-op end to end.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::{sentinel, EngineState};
use crate::engine_config::EngineConfig;
use crate::scoring::{FrameSet, ScoreSkip};
use crate::storage::LastEntryMeta;
use crate::tide::gate::window_id_for;
use crate::tide::provider::TideEvent;
use crate::timeutil::{hours_since, m5_slot, secs_since_m5_close};
use crate::types::Side;

/// Stable skip tags surfaced to users; tests assert on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    AutoOff,
    NotM5Close,
    BadReport,
    NoSignal,
    M30WaitPostCenter,
    M30NeedStableSec,
    M30NeedConsecN,
    DesiredVsM30Mismatch,
    M5GateFail,
    M5GapGuard,
    SecondEntryDisabled,
    SecondEntryNeedRetrace,
    ReportSkip,
    LockedToday,
}

impl SkipReason {
    pub fn tag(self) -> &'static str {
        match self {
            Self::AutoOff => "auto_off",
            Self::NotM5Close => "not_m5_close",
            Self::BadReport => "bad_report",
            Self::NoSignal => "no_signal",
            Self::M30WaitPostCenter => "m30_wait_post_center",
            Self::M30NeedStableSec => "m30_need_stable_sec",
            Self::M30NeedConsecN => "m30_need_consec_n",
            Self::DesiredVsM30Mismatch => "desired_vs_m30_mismatch",
            Self::M5GateFail => "m5_gate_fail",
            Self::M5GapGuard => "m5_gap_guard",
            Self::SecondEntryDisabled => "second_entry_disabled",
            Self::SecondEntryNeedRetrace => "second_entry_need_retrace",
            Self::ReportSkip => "report_skip",
            Self::LockedToday => "locked_today",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Flip-guard memory for one user: the M30 side observed around the current
/// window and when it was last seen changing.
#[derive(Debug, Clone)]
pub struct M30GuardState {
    pub window_id: String,
    pub side: Option<Side>,
    pub stable_since: DateTime<Utc>,
}

/// Everything the tide gate, execute hub and broadcast need from a passing
/// evaluation.
#[derive(Debug, Clone)]
pub struct GoBundle {
    pub signal: Side,
    pub confidence: i64,
    pub frames: FrameSet,
    pub text: String,
    pub tide: Option<TideEvent>,
    /// Signed hours since the tide center, when one is known.
    pub tau_hr: Option<f64>,
    /// Display-only late-band membership; blocking belongs to the gate.
    pub in_late: bool,
    pub slot: i64,
    /// Last M5 close, the entry reference price.
    pub price_ref: f64,
}

/// Outcome of one pipeline pass.
#[derive(Debug)]
pub enum Decision {
    Skip { reason: SkipReason, detail: String },
    Go(Box<GoBundle>),
}

impl Decision {
    fn skip(reason: SkipReason, detail: impl Into<String>) -> Self {
        Self::Skip {
            reason,
            detail: detail.into(),
        }
    }
}

/// Step 6: the M30 flip-guard. Mutates `guard` to track side changes, then
/// demands a post-center stretch of stability (and optionally a run of
/// consecutive M30 closes) before allowing entry.
pub fn flip_guard_check(
    guard: &mut M30GuardState,
    window_id: &str,
    m30_side: Option<Side>,
    m30_consec: usize,
    now: DateTime<Utc>,
    center: DateTime<Utc>,
    cfg: &EngineConfig,
) -> Option<(SkipReason, String)> {
    if guard.window_id != window_id {
        *guard = M30GuardState {
            window_id: window_id.to_string(),
            side: m30_side,
            stable_since: now,
        };
    } else if guard.side != m30_side {
        guard.side = m30_side;
        guard.stable_since = now;
    }

    let tau_secs = (now - center).num_seconds();
    if tau_secs < 0 {
        return Some((
            SkipReason::M30WaitPostCenter,
            format!("{}s to center", -tau_secs),
        ));
    }

    // Stability only counts after the center: a side held since before the
    // center starts its clock there.
    let held_from = guard.stable_since.max(center);
    let held = (now - held_from).num_seconds().max(0);
    if held < cfg.m30_stable_min_sec as i64 {
        return Some((
            SkipReason::M30NeedStableSec,
            format!("{held}/{}s", cfg.m30_stable_min_sec),
        ));
    }

    if cfg.m30_need_consec_n > 0 && m30_consec < cfg.m30_need_consec_n {
        return Some((
            SkipReason::M30NeedConsecN,
            format!("{m30_consec}/{} bars", cfg.m30_need_consec_n),
        ));
    }

    None
}

/// Step 9: entry spacing and the second-entry retrace rule.
pub fn spacing_check(
    last: Option<&LastEntryMeta>,
    window_id: Option<&str>,
    side: Side,
    close: f64,
    now: DateTime<Utc>,
    cfg: &EngineConfig,
) -> Option<(SkipReason, String)> {
    let last = last?;

    let same_window = window_id.map(|w| w == last.window_key).unwrap_or(false);
    let gap_applies = !cfg.m5_gap_scoped_to_window || same_window;
    let elapsed_min = (now - last.at).num_seconds() / 60;

    if gap_applies && elapsed_min < cfg.m5_min_gap_min as i64 {
        return Some((
            SkipReason::M5GapGuard,
            format!("{elapsed_min}/{}min since last entry", cfg.m5_min_gap_min),
        ));
    }

    if same_window {
        if !cfg.allow_second_entry {
            return Some((
                SkipReason::SecondEntryDisabled,
                "second entry in this window disabled".to_string(),
            ));
        }
        if last.price > 0.0 {
            let retrace_pct = match side {
                Side::Long => (last.price - close) / last.price * 100.0,
                Side::Short => (close - last.price) / last.price * 100.0,
            };
            if retrace_pct < cfg.m5_second_entry_min_retrace_pct {
                return Some((
                    SkipReason::SecondEntryNeedRetrace,
                    format!(
                        "{retrace_pct:.3}%/{:.3}%",
                        cfg.m5_second_entry_min_retrace_pct
                    ),
                ));
            }
        }
    }

    None
}

fn map_score_skip(skip: ScoreSkip) -> SkipReason {
    match skip {
        ScoreSkip::BadReport => SkipReason::BadReport,
        ScoreSkip::NoSignal => SkipReason::NoSignal,
        ScoreSkip::ExtremeBlock => SkipReason::ReportSkip,
    }
}

/// Run the full pipeline for one user at `now`.
pub async fn evaluate_tick(state: &EngineState, uid: u64, now: DateTime<Utc>) -> Decision {
    let cfg = state.config.read().clone();
    let user = state.store.get_user(uid, now);

    // ── 1. Auto-enabled flag ─────────────────────────────────────────────
    let auto_enabled = state
        .store
        .get_value::<bool>(&format!("auto_enabled:{uid}"))
        .unwrap_or(true);
    if !auto_enabled {
        return Decision::skip(SkipReason::AutoOff, "auto trading disabled for user");
    }

    // ── 2. Risk-sentinel lock ────────────────────────────────────────────
    if sentinel::is_locked(&state.store, uid, now, cfg.local_tz_offset_hours) {
        return Decision::skip(SkipReason::LockedToday, "sentinel lock active");
    }

    // ── 3. M5-close acceptance + slot de-dup (before any await) ─────────
    let delay = secs_since_m5_close(now);
    if delay > cfg.m5_max_delay_sec as i64 {
        return Decision::skip(SkipReason::NotM5Close, format!("{delay}s after close"));
    }
    let slot = m5_slot(now);
    if !state.claim_m5_slot(uid, slot) {
        return Decision::skip(SkipReason::NotM5Close, format!("slot {slot} already handled"));
    }

    // ── 4. Scorer ────────────────────────────────────────────────────────
    let eval = state.scorer.evaluate(&cfg, &user.settings.pair, now).await;
    if let Some(skip) = eval.skip {
        return Decision::skip(map_score_skip(skip), eval.text);
    }
    let (Some(signal), Some(frames)) = (eval.signal, eval.frames) else {
        return Decision::skip(SkipReason::NoSignal, eval.text);
    };

    // ── 5. Nearest tide center ───────────────────────────────────────────
    let tide = match state.provider.nearest_event(now).await {
        Ok(t) => t,
        Err(e) => {
            warn!(uid, error = %e, "tide lookup failed — gate will report NO_TIDE_DATA");
            None
        }
    };
    let (late_from, late_to) = cfg.late_band();
    let (tau_hr, in_late) = match &tide {
        Some(event) => {
            let tau = hours_since(now, event.center_ts);
            (Some(tau), late_from <= tau && tau <= late_to)
        }
        None => (None, false),
    };

    // ── 6. M30 flip-guard ────────────────────────────────────────────────
    if cfg.m30_flip_guard {
        if let Some(event) = &tide {
            let wid = window_id_for(event, cfg.local_tz_offset_hours);
            let mut guards = state.m30_guard.write();
            let guard = guards.entry(uid).or_insert_with(|| M30GuardState {
                window_id: wid.clone(),
                side: frames.m30.side,
                stable_since: now,
            });
            if let Some((reason, detail)) = flip_guard_check(
                guard,
                &wid,
                frames.m30.side,
                frames.m30.consec_closes,
                now,
                event.center_ts,
                &cfg,
            ) {
                return Decision::Skip { reason, detail };
            }
        }
    }

    // ── 7. Desired vs M30 enforcement ────────────────────────────────────
    if cfg.enforce_m5_match_m30 {
        if let Some(m30_side) = frames.m30.side {
            if m30_side != signal {
                return Decision::skip(
                    SkipReason::DesiredVsM30Mismatch,
                    format!("desired {signal} vs M30 {m30_side}"),
                );
            }
        }
    }

    // ── 8. M5 gate ───────────────────────────────────────────────────────
    let Some(m5) = frames.m5.clone() else {
        return Decision::skip(SkipReason::M5GateFail, "no M5 gate frame");
    };
    if !m5.pass {
        return Decision::skip(SkipReason::M5GateFail, m5.detail);
    }
    let price_ref = m5.ref_close;

    // ── 9. Spacing & second entry ────────────────────────────────────────
    let window_id = tide
        .as_ref()
        .map(|t| window_id_for(t, cfg.local_tz_offset_hours));
    if let Some((reason, detail)) = spacing_check(
        user.last_entry.as_ref(),
        window_id.as_deref(),
        signal,
        price_ref,
        now,
        &cfg,
    ) {
        return Decision::Skip { reason, detail };
    }

    debug!(uid, %signal, slot, "all pipeline guards passed");
    Decision::Go(Box::new(GoBundle {
        signal,
        confidence: eval.confidence,
        frames,
        text: eval.text,
        tide,
        tau_hr,
        in_late,
        slot,
        price_ref,
    }))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, s).unwrap()
    }

    fn guard(window_id: &str, side: Option<Side>, since: DateTime<Utc>) -> M30GuardState {
        M30GuardState {
            window_id: window_id.to_string(),
            side,
            stable_since: since,
        }
    }

    // ---- flip guard ------------------------------------------------------

    #[test]
    fn flip_guard_waits_before_center() {
        let center = at(2, 0, 0);
        let mut g = guard("w", Some(Side::Short), at(1, 0, 0));
        let result = flip_guard_check(&mut g, "w", Some(Side::Short), 5, at(1, 50, 0), center, &cfg());
        let (reason, detail) = result.unwrap();
        assert_eq!(reason, SkipReason::M30WaitPostCenter);
        assert_eq!(detail, "600s to center");
    }

    #[test]
    fn flip_guard_counts_stability_from_center() {
        // Side flipped to SHORT ten minutes before the center; tick at
        // center + 300 s has only 300 s of post-center stability.
        let center = at(2, 0, 0);
        let mut g = guard("w", Some(Side::Short), at(1, 50, 0));
        let result =
            flip_guard_check(&mut g, "w", Some(Side::Short), 5, at(2, 5, 0), center, &cfg());
        let (reason, detail) = result.unwrap();
        assert_eq!(reason, SkipReason::M30NeedStableSec);
        assert_eq!(detail, "300/1800s");
    }

    #[test]
    fn flip_guard_passes_after_stability_window() {
        let center = at(2, 0, 0);
        let mut g = guard("w", Some(Side::Long), at(1, 0, 0));
        // center + 31 minutes > 1800 s of post-center stability.
        let result =
            flip_guard_check(&mut g, "w", Some(Side::Long), 5, at(2, 31, 0), center, &cfg());
        assert!(result.is_none());
    }

    #[test]
    fn flip_guard_resets_clock_on_side_change() {
        let center = at(2, 0, 0);
        let mut g = guard("w", Some(Side::Long), at(1, 0, 0));
        // The side flips at center + 40 min: stability restarts there.
        let result =
            flip_guard_check(&mut g, "w", Some(Side::Short), 5, at(2, 40, 0), center, &cfg());
        let (reason, detail) = result.unwrap();
        assert_eq!(reason, SkipReason::M30NeedStableSec);
        assert_eq!(detail, "0/1800s");
        assert_eq!(g.side, Some(Side::Short));
    }

    #[test]
    fn flip_guard_resets_on_new_window() {
        let center = at(10, 0, 0);
        let mut g = guard("old-window", Some(Side::Long), at(1, 0, 0));
        let result =
            flip_guard_check(&mut g, "new-window", Some(Side::Long), 5, at(10, 5, 0), center, &cfg());
        assert!(result.is_some());
        assert_eq!(g.window_id, "new-window");
    }

    #[test]
    fn flip_guard_consec_bars_requirement() {
        let center = at(2, 0, 0);
        let mut c = cfg();
        c.m30_need_consec_n = 3;
        let mut g = guard("w", Some(Side::Long), at(1, 0, 0));
        let result =
            flip_guard_check(&mut g, "w", Some(Side::Long), 2, at(3, 0, 0), center, &c);
        let (reason, detail) = result.unwrap();
        assert_eq!(reason, SkipReason::M30NeedConsecN);
        assert_eq!(detail, "2/3 bars");

        let result =
            flip_guard_check(&mut g, "w", Some(Side::Long), 3, at(3, 0, 0), center, &c);
        assert!(result.is_none());
    }

    // ---- spacing & second entry ------------------------------------------

    fn last_entry(at_time: DateTime<Utc>, price: f64, window: &str) -> LastEntryMeta {
        LastEntryMeta {
            at: at_time,
            price,
            side: Side::Long,
            window_key: window.to_string(),
        }
    }

    #[test]
    fn no_prior_entry_passes() {
        assert!(spacing_check(None, Some("w"), Side::Long, 30000.0, at(3, 0, 0), &cfg()).is_none());
    }

    #[test]
    fn gap_guard_blocks_fresh_reentry() {
        let last = last_entry(at(2, 50, 0), 30000.0, "w");
        let result = spacing_check(Some(&last), Some("w"), Side::Long, 29000.0, at(2, 55, 0), &cfg());
        let (reason, _) = result.unwrap();
        assert_eq!(reason, SkipReason::M5GapGuard);
    }

    #[test]
    fn gap_scoped_to_window_ignores_other_windows() {
        let last = last_entry(at(2, 50, 0), 30000.0, "other-window");
        // Scoped gap (default): different window, no gap check applies, and
        // no second-entry rule either.
        let result = spacing_check(Some(&last), Some("w"), Side::Long, 30000.0, at(2, 55, 0), &cfg());
        assert!(result.is_none());

        // Unscoped: the gap applies everywhere.
        let mut c = cfg();
        c.m5_gap_scoped_to_window = false;
        let result = spacing_check(Some(&last), Some("w"), Side::Long, 30000.0, at(2, 55, 0), &c);
        assert_eq!(result.unwrap().0, SkipReason::M5GapGuard);
    }

    #[test]
    fn second_entry_disabled_blocks_same_window() {
        let mut c = cfg();
        c.allow_second_entry = false;
        let last = last_entry(at(2, 0, 0), 30000.0, "w");
        let result = spacing_check(Some(&last), Some("w"), Side::Long, 29880.0, at(3, 0, 0), &c);
        assert_eq!(result.unwrap().0, SkipReason::SecondEntryDisabled);
    }

    #[test]
    fn second_entry_retrace_rule() {
        let last = last_entry(at(2, 0, 0), 30000.0, "w");

        // 0.4% retrace >= 0.3% floor: accepted.
        let result = spacing_check(Some(&last), Some("w"), Side::Long, 29880.0, at(3, 0, 0), &cfg());
        assert!(result.is_none());

        // 0.167% retrace: refused.
        let result = spacing_check(Some(&last), Some("w"), Side::Long, 29950.0, at(3, 0, 0), &cfg());
        let (reason, detail) = result.unwrap();
        assert_eq!(reason, SkipReason::SecondEntryNeedRetrace);
        assert!(detail.starts_with("0.167%"));
    }

    #[test]
    fn second_entry_retrace_mirrors_for_short() {
        let mut last = last_entry(at(2, 0, 0), 30000.0, "w");
        last.side = Side::Short;
        // Short retrace means price moved back UP from the prior entry.
        let result = spacing_check(Some(&last), Some("w"), Side::Short, 30120.0, at(3, 0, 0), &cfg());
        assert!(result.is_none());
        let result = spacing_check(Some(&last), Some("w"), Side::Short, 30030.0, at(3, 0, 0), &cfg());
        assert_eq!(result.unwrap().0, SkipReason::SecondEntryNeedRetrace);
    }

    // ---- tags ------------------------------------------------------------

    #[test]
    fn skip_tags_are_stable() {
        assert_eq!(SkipReason::AutoOff.tag(), "auto_off");
        assert_eq!(SkipReason::NotM5Close.tag(), "not_m5_close");
        assert_eq!(SkipReason::M30WaitPostCenter.tag(), "m30_wait_post_center");
        assert_eq!(SkipReason::M30NeedStableSec.tag(), "m30_need_stable_sec");
        assert_eq!(SkipReason::M30NeedConsecN.tag(), "m30_need_consec_n");
        assert_eq!(
            SkipReason::DesiredVsM30Mismatch.tag(),
            "desired_vs_m30_mismatch"
        );
        assert_eq!(SkipReason::M5GateFail.tag(), "m5_gate_fail");
        assert_eq!(SkipReason::M5GapGuard.tag(), "m5_gap_guard");
        assert_eq!(SkipReason::SecondEntryDisabled.tag(), "second_entry_disabled");
        assert_eq!(
            SkipReason::SecondEntryNeedRetrace.tag(),
            "second_entry_need_retrace"
        );
        assert_eq!(SkipReason::LockedToday.tag(), "locked_today");
        assert_eq!(SkipReason::ReportSkip.tag(), "report_skip");
    }
}
