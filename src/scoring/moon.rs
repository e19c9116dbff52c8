// =============================================================================
// Moon bonus — illumination regime presets around the four lunar anchors
// =============================================================================
//
// The lunar cycle is quartered by illumination (0 - 25 - 50 - 75 - 100) and
// direction (waxing / waning) into presets P1..P4. The nearest anchor among
// {New, FirstQuarter, Full, LastQuarter} and the approach direction yield a
// stage (pre / on / post), which maps to an unsigned bonus in [0, 1.5].
//
// The signed variant feeds the aggregate score only — waxing favours longs,
// waning favours shorts — and never chooses the direction itself.
// =============================================================================

use serde::Serialize;

use crate::tide::provider::MoonInfo;
use crate::types::Side;

/// Illumination distance (percentage points) treated as "on" an anchor.
const ON_TOLERANCE_PCT: i16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MoonAnchor {
    New,
    FirstQuarter,
    Full,
    LastQuarter,
}

impl std::fmt::Display for MoonAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::FirstQuarter => write!(f, "FirstQuarter"),
            Self::Full => write!(f, "Full"),
            Self::LastQuarter => write!(f, "LastQuarter"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MoonStage {
    Pre,
    On,
    Post,
}

impl std::fmt::Display for MoonStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::On => write!(f, "on"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// Coarse illumination + direction regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MoonPreset {
    P1,
    P2,
    P3,
    P4,
}

impl std::fmt::Display for MoonPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P1 => write!(f, "P1"),
            Self::P2 => write!(f, "P2"),
            Self::P3 => write!(f, "P3"),
            Self::P4 => write!(f, "P4"),
        }
    }
}

/// Moon contribution to an evaluation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MoonScore {
    pub preset: MoonPreset,
    pub anchor: MoonAnchor,
    pub stage: MoonStage,
    pub waxing: bool,
    pub illumination_pct: u8,
    /// Unsigned bonus in [0, 1.5].
    pub bonus: f64,
}

impl MoonScore {
    /// Signed bonus for scoring: positive when the lunar regime agrees with
    /// `side` (waxing -> long, waning -> short), negative otherwise.
    pub fn signed_for(&self, side: Side) -> f64 {
        let agrees = match side {
            Side::Long => self.waxing,
            Side::Short => !self.waxing,
        };
        if agrees {
            self.bonus
        } else {
            -self.bonus
        }
    }
}

/// Score today's moon against yesterday's (the illumination delta decides
/// waxing vs waning; an unchanged reading falls back to the cycle half).
pub fn moon_score(today: &MoonInfo, yesterday: &MoonInfo) -> MoonScore {
    let illum = today.illumination_pct as i16;
    let waxing = match today.illumination_pct.cmp(&yesterday.illumination_pct) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        // Flat reading at the extremes: 0% turns waxing, 100% turns waning.
        std::cmp::Ordering::Equal => illum <= 50,
    };

    let preset = if illum <= 25 {
        MoonPreset::P1
    } else if illum >= 75 {
        MoonPreset::P3
    } else if waxing {
        MoonPreset::P2
    } else {
        MoonPreset::P4
    };

    // Nearest anchor: quarters are direction-specific at 50%.
    let d_new = illum;
    let d_full = 100 - illum;
    let d_quarter = (illum - 50).abs();
    let (anchor, distance) = if d_quarter <= d_new && d_quarter <= d_full {
        (
            if waxing {
                MoonAnchor::FirstQuarter
            } else {
                MoonAnchor::LastQuarter
            },
            d_quarter,
        )
    } else if d_new <= d_full {
        (MoonAnchor::New, d_new)
    } else {
        (MoonAnchor::Full, d_full)
    };

    let anchor_illum: i16 = match anchor {
        MoonAnchor::New => 0,
        MoonAnchor::Full => 100,
        MoonAnchor::FirstQuarter | MoonAnchor::LastQuarter => 50,
    };

    let stage = if distance <= ON_TOLERANCE_PCT {
        MoonStage::On
    } else {
        let approaching = if waxing {
            anchor_illum > illum
        } else {
            anchor_illum < illum
        };
        if approaching {
            MoonStage::Pre
        } else {
            MoonStage::Post
        }
    };

    let bonus: f64 = match stage {
        MoonStage::On => 1.5,
        MoonStage::Pre => 1.0,
        MoonStage::Post => 0.5,
    };

    MoonScore {
        preset,
        anchor,
        stage,
        waxing,
        illumination_pct: today.illumination_pct,
        bonus: bonus.clamp(0.0, 1.5),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn info(pct: u8) -> MoonInfo {
        MoonInfo {
            phase_label: String::new(),
            illumination_pct: pct,
        }
    }

    #[test]
    fn full_moon_is_on_stage_max_bonus() {
        let score = moon_score(&info(99), &info(96));
        assert_eq!(score.anchor, MoonAnchor::Full);
        assert_eq!(score.stage, MoonStage::On);
        assert_eq!(score.preset, MoonPreset::P3);
        assert!((score.bonus - 1.5).abs() < 1e-9);
    }

    #[test]
    fn waxing_mid_cycle_pre_full() {
        let score = moon_score(&info(62), &info(55));
        assert!(score.waxing);
        assert_eq!(score.preset, MoonPreset::P2);
        // 62% is nearest the first-quarter anchor, already past it.
        assert_eq!(score.anchor, MoonAnchor::FirstQuarter);
        assert_eq!(score.stage, MoonStage::Post);
        assert!((score.bonus - 0.5).abs() < 1e-9);
    }

    #[test]
    fn waning_toward_last_quarter_is_pre() {
        let score = moon_score(&info(68), &info(74));
        assert!(!score.waxing);
        assert_eq!(score.anchor, MoonAnchor::LastQuarter);
        assert_eq!(score.stage, MoonStage::Pre);
        assert!((score.bonus - 1.0).abs() < 1e-9);
    }

    #[test]
    fn new_moon_regime() {
        let score = moon_score(&info(3), &info(8));
        assert_eq!(score.preset, MoonPreset::P1);
        assert_eq!(score.anchor, MoonAnchor::New);
        assert_eq!(score.stage, MoonStage::On);
    }

    #[test]
    fn flat_reading_at_extremes_picks_turn_direction() {
        assert!(moon_score(&info(0), &info(0)).waxing);
        assert!(!moon_score(&info(100), &info(100)).waxing);
    }

    #[test]
    fn signed_bonus_follows_regime_agreement() {
        let waxing = moon_score(&info(62), &info(55));
        assert!(waxing.signed_for(Side::Long) > 0.0);
        assert!(waxing.signed_for(Side::Short) < 0.0);

        let waning = moon_score(&info(40), &info(47));
        assert!(waning.signed_for(Side::Short) > 0.0);
        assert!(waning.signed_for(Side::Long) < 0.0);
    }

    #[test]
    fn bonus_always_in_range() {
        for (today, yest) in [(0u8, 5u8), (25, 20), (50, 45), (75, 80), (100, 95), (33, 33)] {
            let s = moon_score(&info(today), &info(yest));
            assert!((0.0..=1.5).contains(&s.bonus), "bonus {} out of range", s.bonus);
        }
    }
}
