// =============================================================================
// Engine State — single owner of all mutable runtime state
// =============================================================================
//
// The single source of truth for the engine. Subsystems receive
// `Arc<EngineState>` and go through its mutator methods; per-user
// serialization happens via the per-user async locks handed out here.
//
// Thread safety:
//   - parking_lot::RwLock for mutable shared collections.
//   - tokio::sync::Mutex per user for tick serialization (held across
//     awaits, which parking_lot locks must never be).
//   - The store serializes its own persistence internally.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::engine::decision::M30GuardState;
use crate::engine::executor::{AccountRuntime, ExecuteHub};
use crate::engine::{ErrorRecord, OpenPosition};
use crate::engine_config::EngineConfig;
use crate::exchange::{ExchangeClient, FuturesRestClient, PaperClient};
use crate::market_data::KlineFetcher;
use crate::notify::Notifier;
use crate::scoring::Scorer;
use crate::storage::Store;
use crate::tide::provider::TideMoonProvider;

/// Maximum number of recent errors retained for the status API.
const MAX_RECENT_ERRORS: usize = 50;

/// Central engine state shared across all async tasks via `Arc<EngineState>`.
pub struct EngineState {
    pub config: RwLock<EngineConfig>,
    pub store: Store,
    pub scorer: Scorer,
    pub hub: ExecuteHub,
    pub notifier: Notifier,
    pub provider: TideMoonProvider,

    /// Open position per user, mirrored to the store.
    open_positions: RwLock<HashMap<u64, OpenPosition>>,

    /// M5 slot de-dup: last slot processed per user. Written before the
    /// first await of a tick.
    last_m5_slot: RwLock<HashMap<u64, i64>>,

    /// M30 flip-guard state per user.
    pub m30_guard: RwLock<HashMap<u64, M30GuardState>>,

    /// Local date for which the lock notice was already sent, per user.
    pub lock_notified_date: RwLock<HashMap<u64, String>>,

    /// M30 report anchors already served, keyed by (user, anchor epoch).
    pub report_sent: RwLock<HashSet<(u64, i64)>>,

    user_locks: RwLock<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl EngineState {
    /// Build the engine state, wiring accounts into the execute hub and
    /// restoring persisted open positions.
    pub fn new(config: EngineConfig, store: Store, notifier: Notifier) -> Self {
        let fetcher = KlineFetcher::new(config.kline_base_url.clone());
        let provider = TideMoonProvider::new(
            std::env::var("TIDE_BASE_URL")
                .unwrap_or_else(|_| "https://www.worldtides.info/api".to_string()),
            std::env::var("ASTRO_BASE_URL")
                .unwrap_or_else(|_| "https://api.weatherapi.com".to_string()),
            std::env::var("WORLDTIDES_KEY").unwrap_or_default(),
            std::env::var("WEATHERAPI_KEY").unwrap_or_default(),
            config.lat,
            config.lon,
        );
        let scorer = Scorer::new(fetcher.clone(), provider.clone());

        // MULTI accounts from config; accounts without credentials run on
        // paper.
        let multi: Vec<AccountRuntime> = config
            .accounts
            .iter()
            .map(|acc| {
                let client = if acc.api_key.is_empty() || acc.api_secret.is_empty() {
                    info!(account = %acc.name, "no credentials — paper client");
                    ExchangeClient::Paper(PaperClient::new(fetcher.clone()))
                } else {
                    ExchangeClient::Rest(FuturesRestClient::new(
                        acc.api_key.clone(),
                        acc.api_secret.clone(),
                        acc.testnet,
                    ))
                };
                AccountRuntime {
                    name: acc.name.clone(),
                    client,
                    pair_override: acc.pair.clone(),
                }
            })
            .collect();

        // SINGLE fallback from env credentials.
        let single = match (
            std::env::var("EXCHANGE_API_KEY"),
            std::env::var("EXCHANGE_API_SECRET"),
        ) {
            (Ok(key), Ok(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(AccountRuntime {
                    name: "single".to_string(),
                    client: ExchangeClient::Rest(FuturesRestClient::new(key, secret, false)),
                    pair_override: None,
                })
            }
            _ => None,
        };

        let hub = ExecuteHub::new(multi, single);
        if !hub.has_accounts() {
            warn!("no exchange accounts configured — every entry will fail until one is added");
        }

        // Restore persisted open positions.
        let mut open_positions = HashMap::new();
        for uid in store.user_ids() {
            if let Some(pos) = store.get_value::<OpenPosition>(&format!("open_pos:{uid}")) {
                info!(uid, pair = %pos.pair, side = %pos.side, "open position restored");
                open_positions.insert(uid, pos);
            }
        }

        Self {
            config: RwLock::new(config),
            store,
            scorer,
            hub,
            notifier,
            provider,
            open_positions: RwLock::new(open_positions),
            last_m5_slot: RwLock::new(HashMap::new()),
            m30_guard: RwLock::new(HashMap::new()),
            lock_notified_date: RwLock::new(HashMap::new()),
            report_sent: RwLock::new(HashSet::new()),
            user_locks: RwLock::new(HashMap::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // -------------------------------------------------------------------------
    // Per-user serialization
    // -------------------------------------------------------------------------

    /// The async lock serializing one user's tick work.
    pub fn user_lock(&self, uid: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.write();
        locks
            .entry(uid)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // -------------------------------------------------------------------------
    // M5 slot de-dup
    // -------------------------------------------------------------------------

    /// Claim `slot` for `uid`. Returns false when the slot was already
    /// processed — the tick must stop before doing any work.
    pub fn claim_m5_slot(&self, uid: u64, slot: i64) -> bool {
        let mut slots = self.last_m5_slot.write();
        if slots.get(&uid) == Some(&slot) {
            return false;
        }
        slots.insert(uid, slot);
        true
    }

    // -------------------------------------------------------------------------
    // Open positions
    // -------------------------------------------------------------------------

    pub fn open_position(&self, uid: u64) -> Option<OpenPosition> {
        self.open_positions.read().get(&uid).cloned()
    }

    pub fn set_open_position(&self, uid: u64, pos: OpenPosition) {
        self.store.set_value(&format!("open_pos:{uid}"), &pos);
        self.open_positions.write().insert(uid, pos);
    }

    pub fn clear_open_position(&self, uid: u64) {
        self.store.delete_value(&format!("open_pos:{uid}"));
        self.open_positions.write().remove(&uid);
    }

    // -------------------------------------------------------------------------
    // Error log
    // -------------------------------------------------------------------------

    /// Record a non-fatal error for the status API.
    pub fn push_error(&self, message: impl Into<String>, code: Option<String>) {
        let record = ErrorRecord {
            message: message.into(),
            code,
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        let overflow = errors.len().saturating_sub(MAX_RECENT_ERRORS);
        if overflow > 0 {
            errors.drain(..overflow);
        }
    }
}

impl std::fmt::Debug for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineState")
            .field("open_positions", &self.open_positions.read().len())
            .field("hub", &self.hub)
            .finish()
    }
}
