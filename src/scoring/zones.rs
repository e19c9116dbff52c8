// =============================================================================
// Oscillator zones — fixed discretization of RSI and Stochastic %D
// =============================================================================
//
// RSI:   Z1 (<30)  Z2 [30,45)  Z3 [45,55]  Z4 (55,70]  Z5 (>70)
// Stoch: S1 (<20)  S2 [20,40)  S3 [40,60]  S4 (60,80]  S5 (>80)
//
// Z3/S3 is the pivot band: no directional bias, and a barrier when alignment
// is unclear. Transitions between zones carry their own bonuses.
// =============================================================================

use serde::Serialize;

use crate::types::Side;

/// One of the five oscillator zones, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Zone {
    Z1,
    Z2,
    Z3,
    Z4,
    Z5,
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Z1 => write!(f, "Z1"),
            Self::Z2 => write!(f, "Z2"),
            Self::Z3 => write!(f, "Z3"),
            Self::Z4 => write!(f, "Z4"),
            Self::Z5 => write!(f, "Z5"),
        }
    }
}

/// RSI zone by the 30/45/55/70 cutoffs.
pub fn rsi_zone(value: f64) -> Zone {
    if value < 30.0 {
        Zone::Z1
    } else if value < 45.0 {
        Zone::Z2
    } else if value <= 55.0 {
        Zone::Z3
    } else if value <= 70.0 {
        Zone::Z4
    } else {
        Zone::Z5
    }
}

/// Stochastic %D zone by the 20/40/60/80 cutoffs.
pub fn stoch_zone(value: f64) -> Zone {
    if value < 20.0 {
        Zone::Z1
    } else if value < 40.0 {
        Zone::Z2
    } else if value <= 60.0 {
        Zone::Z3
    } else if value <= 80.0 {
        Zone::Z4
    } else {
        Zone::Z5
    }
}

/// A recognized zone transition and the side it rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transition {
    /// Z1 -> Z2 (long) | Z5 -> Z4 (short): recovery out of an extreme.
    SafeRetrace(Side),
    /// Z3 -> Z4 (long) | Z3 -> Z2 (short): break out of the pivot band.
    PivotBreak(Side),
    /// Z4 -> Z5 (long) | Z2 -> Z1 (short): momentum thrust into the extreme.
    ThrustExtreme(Side),
}

impl Transition {
    pub fn side(self) -> Side {
        match self {
            Self::SafeRetrace(s) | Self::PivotBreak(s) | Self::ThrustExtreme(s) => s,
        }
    }
}

/// Classify the move from `prev` to `curr`, if it is one of the rewarded
/// transitions.
pub fn classify_transition(prev: Zone, curr: Zone) -> Option<Transition> {
    match (prev, curr) {
        (Zone::Z1, Zone::Z2) => Some(Transition::SafeRetrace(Side::Long)),
        (Zone::Z5, Zone::Z4) => Some(Transition::SafeRetrace(Side::Short)),
        (Zone::Z3, Zone::Z4) => Some(Transition::PivotBreak(Side::Long)),
        (Zone::Z3, Zone::Z2) => Some(Transition::PivotBreak(Side::Short)),
        (Zone::Z4, Zone::Z5) => Some(Transition::ThrustExtreme(Side::Long)),
        (Zone::Z2, Zone::Z1) => Some(Transition::ThrustExtreme(Side::Short)),
        _ => None,
    }
}
