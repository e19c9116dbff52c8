// =============================================================================
// Engine Configuration — hot-reloadable settings with atomic save
// =============================================================================
//
// Central configuration hub for the Tideflow engine. Every tunable lives here
// so the engine can be reconfigured at runtime without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file. On top of the file, recognized
// environment variables (the bare names from the deployment .env) override
// individual fields via `apply_env_overrides`.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_scheduler_tick_sec() -> u64 {
    5
}

fn default_m5_max_delay_sec() -> u64 {
    90
}

fn default_m30_slot_grace_sec() -> u64 {
    6
}

fn default_tide_window_hours() -> f64 {
    2.5
}

fn default_entry_late_from_hrs() -> f64 {
    1.0
}

fn default_entry_late_to_hrs() -> f64 {
    2.5
}

fn default_max_orders_per_day() -> u32 {
    8
}

fn default_max_orders_per_tide_window() -> u32 {
    2
}

fn default_m30_stable_min_sec() -> u64 {
    1800
}

fn default_m5_min_gap_min() -> u64 {
    15
}

fn default_second_entry_min_retrace_pct() -> f64 {
    0.3
}

fn default_m5_wick_pct() -> f64 {
    0.35
}

fn default_m5_vol_mult_relax() -> f64 {
    1.2
}

fn default_m5_vol_mult_strict() -> f64 {
    1.5
}

fn default_m5_lookback_relax() -> usize {
    3
}

fn default_m5_lookback_strict() -> usize {
    2
}

fn default_entry_seq_window_min() -> i64 {
    15
}

fn default_rsi_gap_min() -> f64 {
    1.0
}

fn default_stch_gap_min() -> f64 {
    3.0
}

fn default_stch_slope_min() -> f64 {
    0.5
}

fn default_stch_recent_n() -> usize {
    3
}

fn default_cross_recent_n() -> usize {
    3
}

fn default_htf_min_align_score() -> f64 {
    4.0
}

fn default_htf_near_align_gap() -> f64 {
    2.0
}

fn default_m30_takeover_min() -> f64 {
    3.5
}

fn default_synergy_bonus() -> f64 {
    1.0
}

fn default_extreme_rsi_ob() -> f64 {
    80.0
}

fn default_extreme_rsi_os() -> f64 {
    20.0
}

fn default_extreme_stoch_ob() -> f64 {
    90.0
}

fn default_extreme_stoch_os() -> f64 {
    10.0
}

fn default_sonic_weight() -> f64 {
    1.0
}

fn default_tp_time_hours() -> f64 {
    4.0
}

fn default_max_pending_minutes() -> i64 {
    10
}

fn default_lat() -> f64 {
    32.7503
}

fn default_lon() -> f64 {
    129.8777
}

fn default_local_tz_offset_hours() -> i32 {
    7
}

fn default_risk_percent() -> f64 {
    20.0
}

fn default_leverage() -> u32 {
    44
}

fn default_pair() -> String {
    "BTC/USDT".to_string()
}

fn default_sl_margin_budget_pct() -> f64 {
    50.0
}

fn default_rr_ratio() -> f64 {
    1.3
}

fn default_tf_cross_bonus() -> f64 {
    2.0
}

fn default_tf_align_bonus() -> f64 {
    1.5
}

fn default_tf_extreme_penalty() -> f64 {
    1.0
}

fn default_rsi_base_h4() -> f64 {
    2.0
}

fn default_rsi_base_m30() -> f64 {
    1.5
}

fn default_stoch_base() -> f64 {
    1.0
}

fn default_transition_bonus() -> f64 {
    1.0
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_kline_base_url() -> String {
    "https://api.binance.com".to_string()
}

// =============================================================================
// Sub-structures
// =============================================================================

/// Whether per-day / per-window counters are keyed by user or shared globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    PerUser,
    Global,
}

impl Default for CounterScope {
    fn default() -> Self {
        Self::PerUser
    }
}

/// Which cluster combinations satisfy the relaxed M5 gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum M5RelaxKind {
    Either,
    RsiOnly,
    CandleOnly,
}

impl Default for M5RelaxKind {
    fn default() -> Self {
        Self::Either
    }
}

/// How the sonic trend (EMA34 vs EMA89) participates in per-timeframe scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SonicMode {
    Off,
    Weight,
    Veto,
}

impl Default for SonicMode {
    fn default() -> Self {
        Self::Weight
    }
}

/// One exchange account in the multi-account fan-out, tried in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub testnet: bool,
    /// Optional pair override for this account; falls back to user settings.
    #[serde(default)]
    pub pair: Option<String>,
}

/// Tunable scoring magnitudes shared by the H4/M30/M5 scorers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringParams {
    /// Bonus when RSI and Stoch crossed their signals in the same direction
    /// within `cross_recent_n` bars.
    #[serde(default = "default_tf_cross_bonus")]
    pub tf_cross_bonus: f64,

    /// Bonus when RSI and Stoch currently align in the same direction.
    #[serde(default = "default_tf_align_bonus")]
    pub tf_align_bonus: f64,

    /// Penalty when the chosen side sits in its exhaustion zone.
    #[serde(default = "default_tf_extreme_penalty")]
    pub tf_extreme_penalty: f64,

    /// RSI zone base magnitude on H4.
    #[serde(default = "default_rsi_base_h4")]
    pub rsi_base_h4: f64,

    /// RSI zone base magnitude on M30.
    #[serde(default = "default_rsi_base_m30")]
    pub rsi_base_m30: f64,

    /// Stochastic zone base magnitude (both timeframes).
    #[serde(default = "default_stoch_base")]
    pub stoch_base: f64,

    /// Bonus for a recognized zone transition (safe retrace, pivot break,
    /// thrust extreme).
    #[serde(default = "default_transition_bonus")]
    pub transition_bonus: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            tf_cross_bonus: default_tf_cross_bonus(),
            tf_align_bonus: default_tf_align_bonus(),
            tf_extreme_penalty: default_tf_extreme_penalty(),
            rsi_base_h4: default_rsi_base_h4(),
            rsi_base_m30: default_rsi_base_m30(),
            stoch_base: default_stoch_base(),
            transition_bonus: default_transition_bonus(),
        }
    }
}

/// SL/TP derivation and sizing parameters for the execute hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorParams {
    /// Fraction of margin the stop-loss may consume, in percent. The price
    /// distance is this budget divided by leverage.
    #[serde(default = "default_sl_margin_budget_pct")]
    pub sl_margin_budget_pct: f64,

    /// Reward:risk ratio applied to the SL distance to place the TP.
    #[serde(default = "default_rr_ratio")]
    pub rr_ratio: f64,
}

impl Default for ExecutorParams {
    fn default() -> Self {
        Self {
            sl_margin_budget_pct: default_sl_margin_budget_pct(),
            rr_ratio: default_rr_ratio(),
        }
    }
}

/// A named parameter bundle applied with one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Conservative,
    Standard,
    Aggressive,
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "standard" => Ok(Self::Standard),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown preset: {other}")),
        }
    }
}

impl Preset {
    /// (risk_percent, leverage, entry_late_only) applied by this preset.
    pub fn tuning(self) -> (f64, u32, bool) {
        match self {
            Self::Conservative => (10.0, 17, true),
            Self::Standard => (20.0, 26, false),
            Self::Aggressive => (20.0, 44, false),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level runtime configuration for the Tideflow engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Scheduler -----------------------------------------------------------

    /// Main loop period in seconds.
    #[serde(default = "default_scheduler_tick_sec")]
    pub scheduler_tick_sec: u64,

    /// Max seconds after an M5 close at which a tick still counts as that
    /// close. Endpoints inclusive.
    #[serde(default = "default_m5_max_delay_sec")]
    pub m5_max_delay_sec: u64,

    /// Tolerance for hitting an M30 report anchor.
    #[serde(default = "default_m30_slot_grace_sec")]
    pub m30_slot_grace_sec: u64,

    // --- Tide window & quotas ------------------------------------------------

    /// Half-width of the tide window around a center, in hours.
    #[serde(default = "default_tide_window_hours")]
    pub tide_window_hours: f64,

    /// When true, entries are only taken inside the late band.
    #[serde(default)]
    pub entry_late_only: bool,

    #[serde(default = "default_entry_late_from_hrs")]
    pub entry_late_from_hrs: f64,

    #[serde(default = "default_entry_late_to_hrs")]
    pub entry_late_to_hrs: f64,

    #[serde(default = "default_max_orders_per_day")]
    pub max_orders_per_day: u32,

    #[serde(default = "default_max_orders_per_tide_window")]
    pub max_orders_per_tide_window: u32,

    #[serde(default)]
    pub counter_scope: CounterScope,

    // --- M30 flip guard ------------------------------------------------------

    #[serde(default = "default_true")]
    pub m30_flip_guard: bool,

    /// Seconds of stable M30 side required after the tide center.
    #[serde(default = "default_m30_stable_min_sec")]
    pub m30_stable_min_sec: u64,

    /// Consecutive closed M30 bars required in the held side (0 disables).
    #[serde(default)]
    pub m30_need_consec_n: usize,

    #[serde(default = "default_true")]
    pub enforce_m5_match_m30: bool,

    // --- Entry spacing & second entry ----------------------------------------

    /// Minimum minutes between entries.
    #[serde(default = "default_m5_min_gap_min")]
    pub m5_min_gap_min: u64,

    /// When true, the gap only applies to entries in the same tide window.
    #[serde(default = "default_true")]
    pub m5_gap_scoped_to_window: bool,

    #[serde(default = "default_true")]
    pub allow_second_entry: bool,

    /// Minimum retrace vs. the previous entry price, in percent.
    #[serde(default = "default_second_entry_min_retrace_pct")]
    pub m5_second_entry_min_retrace_pct: f64,

    // --- M5 gate -------------------------------------------------------------

    #[serde(default = "default_m5_wick_pct")]
    pub m5_wick_pct: f64,

    #[serde(default = "default_m5_vol_mult_relax")]
    pub m5_vol_mult_relax: f64,

    #[serde(default = "default_m5_vol_mult_strict")]
    pub m5_vol_mult_strict: f64,

    #[serde(default = "default_m5_lookback_relax")]
    pub m5_lookback_relax: usize,

    #[serde(default = "default_m5_lookback_strict")]
    pub m5_lookback_strict: usize,

    #[serde(default)]
    pub m5_relax_kind: M5RelaxKind,

    /// Require the candle cluster to fire on the most recent closed bar.
    #[serde(default)]
    pub m5_need_current_bar: bool,

    /// Strict mode requires both clusters within this many minutes.
    #[serde(default = "default_entry_seq_window_min")]
    pub entry_seq_window_min: i64,

    /// Strict sequencing instead of relaxed single-cluster acceptance.
    #[serde(default)]
    pub m5_strict_mode: bool,

    // --- Cross / alignment tunables ------------------------------------------

    #[serde(default = "default_rsi_gap_min")]
    pub rsi_gap_min: f64,

    #[serde(default = "default_stch_gap_min")]
    pub stch_gap_min: f64,

    #[serde(default = "default_stch_slope_min")]
    pub stch_slope_min: f64,

    #[serde(default = "default_stch_recent_n")]
    pub stch_recent_n: usize,

    #[serde(default = "default_cross_recent_n")]
    pub cross_recent_n: usize,

    // --- HTF aggregation -----------------------------------------------------

    #[serde(default = "default_true")]
    pub htf_near_align: bool,

    #[serde(default = "default_htf_min_align_score")]
    pub htf_min_align_score: f64,

    #[serde(default = "default_htf_near_align_gap")]
    pub htf_near_align_gap: f64,

    #[serde(default = "default_true")]
    pub synergy_on: bool,

    #[serde(default = "default_synergy_bonus")]
    pub synergy_bonus: f64,

    /// Minimum M30 score for the M30 side to take over when H4 is flat.
    #[serde(default = "default_m30_takeover_min")]
    pub m30_takeover_min: f64,

    // --- Extreme block -------------------------------------------------------

    #[serde(default = "default_true")]
    pub extreme_block_on: bool,

    #[serde(default = "default_extreme_rsi_ob")]
    pub extreme_rsi_ob: f64,

    #[serde(default = "default_extreme_rsi_os")]
    pub extreme_rsi_os: f64,

    #[serde(default = "default_extreme_stoch_ob")]
    pub extreme_stoch_ob: f64,

    #[serde(default = "default_extreme_stoch_os")]
    pub extreme_stoch_os: f64,

    // --- Sonic trend ---------------------------------------------------------

    #[serde(default)]
    pub sonic_mode: SonicMode,

    #[serde(default = "default_sonic_weight")]
    pub sonic_weight: f64,

    // --- Exit & sentinel -----------------------------------------------------

    /// Hours after the tide center (or entry) at which the position is closed.
    #[serde(default = "default_tp_time_hours")]
    pub tp_time_hours: f64,

    #[serde(default = "default_true")]
    pub auto_lock_on_2_sl: bool,

    // --- Manual approval -----------------------------------------------------

    #[serde(default = "default_max_pending_minutes")]
    pub max_pending_minutes: i64,

    // --- Tide provider location & local time ---------------------------------

    #[serde(default = "default_lat")]
    pub lat: f64,

    #[serde(default = "default_lon")]
    pub lon: f64,

    /// Fixed offset used for local day keys and window ids.
    #[serde(default = "default_local_tz_offset_hours")]
    pub local_tz_offset_hours: i32,

    // --- Defaults applied to new users ---------------------------------------

    #[serde(default = "default_pair")]
    pub default_pair: String,

    #[serde(default = "default_risk_percent")]
    pub default_risk_percent: f64,

    #[serde(default = "default_leverage")]
    pub default_leverage: u32,

    // --- Accounts ------------------------------------------------------------

    /// Ordered multi-account fan-out list. The ENV-configured single account
    /// is a separate fallback, not listed here.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    // --- Nested parameter bundles --------------------------------------------

    #[serde(default)]
    pub scoring: ScoringParams,

    #[serde(default)]
    pub executor: ExecutorParams,

    // --- Ambient surfaces ----------------------------------------------------

    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,

    #[serde(default = "default_kline_base_url")]
    pub kline_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Round-trip through serde so every `default = "..."` helper applies.
        serde_json::from_str("{}").expect("empty config must deserialize")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            tick_sec = config.scheduler_tick_sec,
            tide_window_hours = config.tide_window_hours,
            accounts = config.accounts.len(),
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Overlay recognized environment variables on top of the loaded file.
    ///
    /// Unparsable values are skipped with a warning rather than aborting
    /// startup.
    pub fn apply_env_overrides(&mut self) {
        env_u64("SCHEDULER_TICK_SEC", &mut self.scheduler_tick_sec);
        env_u64("M5_MAX_DELAY_SEC", &mut self.m5_max_delay_sec);
        env_u64("M30_SLOT_GRACE_SEC", &mut self.m30_slot_grace_sec);
        env_f64("TIDE_WINDOW_HOURS", &mut self.tide_window_hours);
        env_bool("ENTRY_LATE_ONLY", &mut self.entry_late_only);
        env_f64("ENTRY_LATE_FROM_HRS", &mut self.entry_late_from_hrs);
        env_f64("ENTRY_LATE_TO_HRS", &mut self.entry_late_to_hrs);
        env_u32("MAX_ORDERS_PER_DAY", &mut self.max_orders_per_day);
        env_u32("MAX_ORDERS_PER_TIDE_WINDOW", &mut self.max_orders_per_tide_window);
        if let Ok(v) = std::env::var("COUNTER_SCOPE") {
            match v.to_ascii_lowercase().as_str() {
                "per_user" => self.counter_scope = CounterScope::PerUser,
                "global" => self.counter_scope = CounterScope::Global,
                other => warn!(value = other, "unrecognized COUNTER_SCOPE — keeping current"),
            }
        }
        env_bool("M30_FLIP_GUARD", &mut self.m30_flip_guard);
        env_u64("M30_STABLE_MIN_SEC", &mut self.m30_stable_min_sec);
        env_usize("M30_NEED_CONSEC_N", &mut self.m30_need_consec_n);
        env_bool("ENFORCE_M5_MATCH_M30", &mut self.enforce_m5_match_m30);
        env_u64("M5_MIN_GAP_MIN", &mut self.m5_min_gap_min);
        env_bool("M5_GAP_SCOPED_TO_WINDOW", &mut self.m5_gap_scoped_to_window);
        env_bool("ALLOW_SECOND_ENTRY", &mut self.allow_second_entry);
        env_f64(
            "M5_SECOND_ENTRY_MIN_RETRACE_PCT",
            &mut self.m5_second_entry_min_retrace_pct,
        );
        env_f64("M5_WICK_PCT", &mut self.m5_wick_pct);
        env_f64("M5_VOL_MULT_RELAX", &mut self.m5_vol_mult_relax);
        env_f64("M5_VOL_MULT_STRICT", &mut self.m5_vol_mult_strict);
        env_usize("M5_LOOKBACK_RELAX", &mut self.m5_lookback_relax);
        env_usize("M5_LOOKBACK_STRICT", &mut self.m5_lookback_strict);
        env_bool("M5_NEED_CURRENT_BAR", &mut self.m5_need_current_bar);
        env_bool("M5_STRICT_MODE", &mut self.m5_strict_mode);
        env_i64("ENTRY_SEQ_WINDOW_MIN", &mut self.entry_seq_window_min);
        if let Ok(v) = std::env::var("M5_RELAX_KIND") {
            match v.to_ascii_lowercase().as_str() {
                "either" => self.m5_relax_kind = M5RelaxKind::Either,
                "rsi_only" => self.m5_relax_kind = M5RelaxKind::RsiOnly,
                "candle_only" => self.m5_relax_kind = M5RelaxKind::CandleOnly,
                other => warn!(value = other, "unrecognized M5_RELAX_KIND — keeping current"),
            }
        }
        env_f64("RSI_GAP_MIN", &mut self.rsi_gap_min);
        env_f64("STCH_GAP_MIN", &mut self.stch_gap_min);
        env_f64("STCH_SLOPE_MIN", &mut self.stch_slope_min);
        env_usize("STCH_RECENT_N", &mut self.stch_recent_n);
        env_usize("CROSS_RECENT_N", &mut self.cross_recent_n);
        env_bool("HTF_NEAR_ALIGN", &mut self.htf_near_align);
        env_f64("HTF_MIN_ALIGN_SCORE", &mut self.htf_min_align_score);
        env_f64("HTF_NEAR_ALIGN_GAP", &mut self.htf_near_align_gap);
        env_bool("SYNERGY_ON", &mut self.synergy_on);
        env_f64("M30_TAKEOVER_MIN", &mut self.m30_takeover_min);
        env_bool("EXTREME_BLOCK_ON", &mut self.extreme_block_on);
        env_f64("EXTREME_RSI_OB", &mut self.extreme_rsi_ob);
        env_f64("EXTREME_RSI_OS", &mut self.extreme_rsi_os);
        env_f64("EXTREME_STOCH_OB", &mut self.extreme_stoch_ob);
        env_f64("EXTREME_STOCH_OS", &mut self.extreme_stoch_os);
        if let Ok(v) = std::env::var("SONIC_MODE") {
            match v.to_ascii_lowercase().as_str() {
                "off" => self.sonic_mode = SonicMode::Off,
                "weight" => self.sonic_mode = SonicMode::Weight,
                "veto" => self.sonic_mode = SonicMode::Veto,
                other => warn!(value = other, "unrecognized SONIC_MODE — keeping current"),
            }
        }
        env_f64("SONIC_WEIGHT", &mut self.sonic_weight);
        env_f64("TP_TIME_HOURS", &mut self.tp_time_hours);
        env_bool("AUTO_LOCK_ON_2_SL", &mut self.auto_lock_on_2_sl);
        env_i64("MAX_PENDING_MINUTES", &mut self.max_pending_minutes);
        env_f64("LAT", &mut self.lat);
        env_f64("LON", &mut self.lon);
    }

    /// Late band as an inclusive `[from, to]` pair in hours after the center.
    pub fn late_band(&self) -> (f64, f64) {
        (self.entry_late_from_hrs, self.entry_late_to_hrs)
    }
}

// =============================================================================
// Env parsing helpers
// =============================================================================

fn env_bool(name: &str, slot: &mut bool) {
    if let Ok(v) = std::env::var(name) {
        *slot = matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        );
    }
}

fn env_f64(name: &str, slot: &mut f64) {
    if let Ok(v) = std::env::var(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(var = name, value = %v, "ignoring unparsable float override"),
        }
    }
}

fn env_u64(name: &str, slot: &mut u64) {
    if let Ok(v) = std::env::var(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(var = name, value = %v, "ignoring unparsable integer override"),
        }
    }
}

fn env_u32(name: &str, slot: &mut u32) {
    if let Ok(v) = std::env::var(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(var = name, value = %v, "ignoring unparsable integer override"),
        }
    }
}

fn env_usize(name: &str, slot: &mut usize) {
    if let Ok(v) = std::env::var(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(var = name, value = %v, "ignoring unparsable integer override"),
        }
    }
}

fn env_i64(name: &str, slot: &mut i64) {
    if let Ok(v) = std::env::var(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(var = name, value = %v, "ignoring unparsable integer override"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.scheduler_tick_sec, 5);
        assert_eq!(cfg.m5_max_delay_sec, 90);
        assert!((cfg.tide_window_hours - 2.5).abs() < f64::EPSILON);
        assert_eq!(cfg.max_orders_per_day, 8);
        assert_eq!(cfg.max_orders_per_tide_window, 2);
        assert_eq!(cfg.counter_scope, CounterScope::PerUser);
        assert!(cfg.m30_flip_guard);
        assert_eq!(cfg.m30_stable_min_sec, 1800);
        assert_eq!(cfg.m5_relax_kind, M5RelaxKind::Either);
        assert_eq!(cfg.sonic_mode, SonicMode::Weight);
        assert!((cfg.tp_time_hours - 4.0).abs() < f64::EPSILON);
        assert!(cfg.auto_lock_on_2_sl);
        assert!((cfg.lat - 32.7503).abs() < 1e-9);
        assert!((cfg.lon - 129.8777).abs() < 1e-9);
        assert_eq!(cfg.local_tz_offset_hours, 7);
        assert_eq!(cfg.default_pair, "BTC/USDT");
        assert_eq!(cfg.default_leverage, 44);
        assert!(cfg.accounts.is_empty());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_orders_per_day, 8);
        assert!(cfg.enforce_m5_match_m30);
        assert!(cfg.allow_second_entry);
        assert!((cfg.m5_second_entry_min_retrace_pct - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "tide_window_hours": 1.5,
            "counter_scope": "global",
            "accounts": [{"name": "alpha", "exchange": "binance-futures"}]
        }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.tide_window_hours - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.counter_scope, CounterScope::Global);
        assert_eq!(cfg.accounts.len(), 1);
        assert_eq!(cfg.accounts[0].name, "alpha");
        assert!(!cfg.accounts[0].testnet);
        // Untouched fields keep defaults.
        assert_eq!(cfg.max_orders_per_tide_window, 2);
        assert_eq!(cfg.scheduler_tick_sec, 5);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.scheduler_tick_sec, cfg2.scheduler_tick_sec);
        assert_eq!(cfg.counter_scope, cfg2.counter_scope);
        assert_eq!(cfg.m5_relax_kind, cfg2.m5_relax_kind);
        assert!((cfg.tide_window_hours - cfg2.tide_window_hours).abs() < f64::EPSILON);
    }

    #[test]
    fn preset_tuning_values() {
        assert_eq!(Preset::Conservative.tuning(), (10.0, 17, true));
        assert_eq!(Preset::Aggressive.tuning(), (20.0, 44, false));
        assert_eq!("standard".parse::<Preset>().unwrap(), Preset::Standard);
        assert!("turbo".parse::<Preset>().is_err());
    }

    #[test]
    fn late_band_pair() {
        let cfg = EngineConfig::default();
        let (from, to) = cfg.late_band();
        assert!((from - 1.0).abs() < f64::EPSILON);
        assert!((to - 2.5).abs() < f64::EPSILON);
    }
}
