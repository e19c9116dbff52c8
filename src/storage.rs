// =============================================================================
// Persistent keyed store — user records, counters, scalar flags
// =============================================================================
//
// Single JSON file (`bot_state.json`) holding three namespaces:
//   - users:    uid -> UserRecord (settings, day quota, window trades, pending)
//   - counters: string key -> i64, atomic increment under the store lock
//   - values:   free-form scalar flags (sentinel day records, locks)
//
// Counter bumps that must not double-count carry an operation id; applied ids
// are remembered so re-applying the same bump is a no-op.
//
// Every mutation persists through an atomic tmp + rename write. Durability is
// at-least after each successful write.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::timeutil::local_day_key;
use crate::types::{Side, TradeMode};

// =============================================================================
// User-scoped records
// =============================================================================

fn default_pair() -> String {
    "BTC/USDT".to_string()
}

fn default_risk_percent() -> f64 {
    20.0
}

fn default_leverage() -> u32 {
    44
}

fn default_balance() -> f64 {
    100.0
}

fn default_tide_window_hours() -> f64 {
    2.5
}

fn default_max_orders_per_day() -> u32 {
    8
}

fn default_max_orders_per_tide_window() -> u32 {
    2
}

/// Per-user trading settings, mutated only via user commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default = "default_pair")]
    pub pair: String,
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub mode: TradeMode,
    /// Margin balance used for sizing, in quote units.
    #[serde(default = "default_balance")]
    pub balance: f64,
    #[serde(default = "default_tide_window_hours")]
    pub tide_window_hours: f64,
    #[serde(default = "default_max_orders_per_day")]
    pub max_orders_per_day: u32,
    #[serde(default = "default_max_orders_per_tide_window")]
    pub max_orders_per_tide_window: u32,
    #[serde(default)]
    pub m5_report_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty settings must deserialize")
    }
}

/// Daily quota counter, reset when the local date rolls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDay {
    pub date_str: String,
    #[serde(default)]
    pub count: u32,
}

/// Status of a manually-approved signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
    ExpiredTide,
}

impl std::fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::ExpiredTide => write!(f, "EXPIRED_TIDE"),
        }
    }
}

/// Snapshot captured when a manual-mode signal is parked for approval.
///
/// The payload is authoritative at execution time; approval re-checks the
/// tide gate only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualPending {
    /// Short id the user echoes back in /approve and /reject.
    pub pid: String,
    pub status: PendingStatus,
    pub symbol: String,
    pub side: Side,
    pub confidence: i64,
    pub entry_hint: Option<f64>,
    pub suggested_sl: Option<f64>,
    pub suggested_tp: Option<f64>,
    pub risk_percent: f64,
    pub leverage: u32,
    /// Rendered frames/gates report attached to the confirmation.
    #[serde(default)]
    pub report_text: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata of the most recent entry, consumed by the spacing and
/// second-entry guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastEntryMeta {
    pub at: DateTime<Utc>,
    pub price: f64,
    pub side: Side,
    pub window_key: String,
}

/// Everything persisted for a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub settings: UserSettings,
    pub today: UserDay,
    /// windowId -> executed trade count within that tide window.
    #[serde(default)]
    pub tide_window_trades: HashMap<String, u32>,
    #[serde(default)]
    pub pending: Option<ManualPending>,
    #[serde(default)]
    pub last_entry: Option<LastEntryMeta>,
    #[serde(default)]
    pub history: Vec<serde_json::Value>,
}

impl UserRecord {
    fn fresh(today: &str) -> Self {
        Self {
            settings: UserSettings::default(),
            today: UserDay {
                date_str: today.to_string(),
                count: 0,
            },
            tide_window_trades: HashMap::new(),
            pending: None,
            last_entry: None,
            history: Vec::new(),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    users: HashMap<String, UserRecord>,
    #[serde(default)]
    counters: HashMap<String, i64>,
    #[serde(default)]
    values: HashMap<String, serde_json::Value>,
    /// Applied idempotent operation ids.
    #[serde(default)]
    ops: HashSet<String>,
}

/// File-backed store shared by every subsystem. All access goes through the
/// internal mutex; persistence happens inside the lock so writes are
/// linearized in mutation order.
pub struct Store {
    path: PathBuf,
    tz_offset_hours: i32,
    inner: Mutex<StoreData>,
}

impl Store {
    /// Open (or create) the store at `path`. A corrupt file is preserved
    /// nowhere — it is replaced on the next save — but loading never fails
    /// the engine.
    pub fn open(path: impl Into<PathBuf>, tz_offset_hours: i32) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "state file unreadable — starting empty");
                    StoreData::default()
                }
            },
            Err(_) => StoreData::default(),
        };
        info!(path = %path.display(), users = data.users.len(), "store opened");
        Self {
            path,
            tz_offset_hours,
            inner: Mutex::new(data),
        }
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        let content = serde_json::to_string_pretty(data).context("failed to serialise state")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &content)
            .with_context(|| format!("failed to write tmp state to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to rename tmp state to {}", self.path.display()))?;
        Ok(())
    }

    fn persist_logged(&self, data: &StoreData) {
        // Persistence failures are logged, never fatal.
        if let Err(e) = self.persist(data) {
            warn!(error = %e, "state persist failed");
        }
    }

    // -------------------------------------------------------------------------
    // User namespace
    // -------------------------------------------------------------------------

    /// Load a user's record, creating it on first touch and rolling the day
    /// quota when the local date has changed since the last access.
    pub fn get_user(&self, uid: u64, now: DateTime<Utc>) -> UserRecord {
        let today = local_day_key(now, self.tz_offset_hours);
        let mut data = self.inner.lock();
        let mut dirty = false;

        let record = data
            .users
            .entry(uid.to_string())
            .or_insert_with(|| {
                dirty = true;
                UserRecord::fresh(&today)
            })
            .clone();

        let record = if record.today.date_str != today {
            let mut rolled = record;
            info!(uid, old = %rolled.today.date_str, new = %today, "user day rolled — quota reset");
            rolled.today = UserDay {
                date_str: today.clone(),
                count: 0,
            };
            rolled.tide_window_trades.clear();
            data.users.insert(uid.to_string(), rolled.clone());
            dirty = true;
            rolled
        } else {
            record
        };

        if dirty {
            self.persist_logged(&data);
        }
        record
    }

    /// Replace a user's record and persist.
    pub fn put_user(&self, uid: u64, record: UserRecord) {
        let mut data = self.inner.lock();
        data.users.insert(uid.to_string(), record);
        self.persist_logged(&data);
    }

    /// All known user ids.
    pub fn user_ids(&self) -> Vec<u64> {
        let data = self.inner.lock();
        let mut ids: Vec<u64> = data
            .users
            .keys()
            .filter_map(|k| k.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Read a counter; missing keys read as 0. A negative stored value is an
    /// invariant violation: it is logged and clamped.
    pub fn get_counter(&self, key: &str) -> i64 {
        let data = self.inner.lock();
        let v = data.counters.get(key).copied().unwrap_or(0);
        if v < 0 {
            warn!(key, value = v, "negative counter — clamping to 0");
            return 0;
        }
        v
    }

    /// Atomically increment a counter and return the new value.
    pub fn incr_counter(&self, key: &str, by: i64) -> i64 {
        let mut data = self.inner.lock();
        let slot = data.counters.entry(key.to_string()).or_insert(0);
        *slot += by;
        let v = *slot;
        self.persist_logged(&data);
        v
    }

    /// Increment a set of counters at most once for the given operation id.
    ///
    /// Returns `true` when the increments were applied, `false` when the id
    /// had already been seen (no-op).
    pub fn incr_counters_once(&self, op_id: &str, keys: &[&str]) -> bool {
        let mut data = self.inner.lock();
        if !data.ops.insert(op_id.to_string()) {
            return false;
        }
        for key in keys {
            *data.counters.entry((*key).to_string()).or_insert(0) += 1;
        }
        self.persist_logged(&data);
        true
    }

    // -------------------------------------------------------------------------
    // Scalar values
    // -------------------------------------------------------------------------

    pub fn get_value<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        let data = self.inner.lock();
        data.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_value<T: Serialize>(&self, key: &str, value: &T) {
        let mut data = self.inner.lock();
        match serde_json::to_value(value) {
            Ok(v) => {
                data.values.insert(key.to_string(), v);
                self.persist_logged(&data);
            }
            Err(e) => warn!(key, error = %e, "value not serializable — skipped"),
        }
    }

    pub fn delete_value(&self, key: &str) {
        let mut data = self.inner.lock();
        if data.values.remove(key).is_some() {
            self.persist_logged(&data);
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}
