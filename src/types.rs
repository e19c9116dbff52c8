// =============================================================================
// Shared types used across the Tideflow trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of a futures entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The opposite direction.
    pub fn flip(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Exchange order side ("BUY"/"SELL") for opening this direction.
    pub fn order_side(self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Self::Long),
            "SHORT" | "SELL" => Ok(Self::Short),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Whether a tide extreme is a high or a low water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TideKind {
    High,
    Low,
}

impl std::fmt::Display for TideKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Per-user trading mode: auto-executes signals, or queues them for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Auto,
    Manual,
}

impl Default for TradeMode {
    fn default() -> Self {
        Self::Manual
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for TradeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// How a closed trade ended. Feeds the risk sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseResult {
    Sl,
    Tp,
    Manual,
}

impl std::fmt::Display for CloseResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sl => write!(f, "SL"),
            Self::Tp => write!(f, "TP"),
            Self::Manual => write!(f, "MANUAL"),
        }
    }
}

/// Strip the display separator from a pair: "BTC/USDT" -> "BTCUSDT".
///
/// The slash form is the user-facing spot mirror; every exchange and kline
/// call uses the concatenated market symbol.
pub fn market_symbol(pair: &str) -> String {
    pair.chars()
        .filter(|c| *c != '/')
        .collect::<String>()
        .to_uppercase()
}
