// =============================================================================
// Execute Hub — multi-account fan-out with SL/TP derivation
// =============================================================================
//
// Order of attempts:
//   1. Every MULTI account in declared order; each produces a per-account
//      fill record.
//   2. If at least one MULTI opened, the SINGLE (env-configured) account is
//      skipped and flagged as ignored.
//   3. Otherwise the SINGLE account is the fallback.
//
// SL/TP derivation works from the reference price and leverage: the stop
// consumes a fixed share of margin (`sl_margin_budget_pct / leverage` of
// price), the target sits `rr_ratio` times that distance away. Quantity is
// the margin allocation times leverage at the reference price.
//
// The hub is side-agnostic; LONG/SHORT becomes BUY/SELL at the adapter
// boundary.
// =============================================================================

use serde::Serialize;
use tracing::{info, warn};

use crate::engine_config::ExecutorParams;
use crate::exchange::ExchangeClient;
use crate::types::{market_symbol, Side};

/// One exchange account wired to its client.
#[derive(Debug, Clone)]
pub struct AccountRuntime {
    pub name: String,
    pub client: ExchangeClient,
    /// Optional pair override for this account.
    pub pair_override: Option<String>,
}

impl AccountRuntime {
    pub fn is_simulated(&self) -> bool {
        matches!(self.client, ExchangeClient::Paper(_))
    }
}

/// Everything the hub needs to size and place one entry.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub pair: String,
    pub side: Side,
    pub reference_price: f64,
    pub balance: f64,
    pub risk_percent: f64,
    pub leverage: u32,
}

/// Per-account fill record.
#[derive(Debug, Clone, Serialize)]
pub struct AccountFill {
    pub account: String,
    pub opened: bool,
    pub entry_id: Option<String>,
    pub qty: f64,
    pub sl: f64,
    pub tp: f64,
    pub simulated: bool,
    pub error: Option<String>,
}

/// Aggregate outcome of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutcome {
    pub opened_real: bool,
    pub entry_ids: Vec<String>,
    pub per_account: Vec<AccountFill>,
    pub single_ignored_because_multi_opened: bool,
    pub sl: f64,
    pub tp: f64,
    pub qty_total: f64,
}

/// Stop and target prices for an entry at `price` under `leverage`.
pub fn derive_sl_tp(side: Side, price: f64, leverage: u32, params: &ExecutorParams) -> (f64, f64) {
    let lev = leverage.max(1) as f64;
    let sl_frac = params.sl_margin_budget_pct / 100.0 / lev;
    let tp_frac = params.rr_ratio * sl_frac;
    match side {
        Side::Long => (price * (1.0 - sl_frac), price * (1.0 + tp_frac)),
        Side::Short => (price * (1.0 + sl_frac), price * (1.0 - tp_frac)),
    }
}

/// Contract quantity for a margin allocation at `price`.
pub fn position_qty(balance: f64, risk_percent: f64, leverage: u32, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    (balance * risk_percent / 100.0 * leverage as f64 / price).max(0.0)
}

/// The multi-account execute hub.
pub struct ExecuteHub {
    multi: Vec<AccountRuntime>,
    single: Option<AccountRuntime>,
}

impl ExecuteHub {
    pub fn new(multi: Vec<AccountRuntime>, single: Option<AccountRuntime>) -> Self {
        Self { multi, single }
    }

    pub fn has_accounts(&self) -> bool {
        !self.multi.is_empty() || self.single.is_some()
    }

    /// The client used for position queries: the first MULTI account, else
    /// the SINGLE fallback.
    pub fn primary_client(&self) -> Option<&ExchangeClient> {
        self.multi
            .first()
            .map(|a| &a.client)
            .or_else(|| self.single.as_ref().map(|a| &a.client))
    }

    /// Look up an account's client by name (close command's account filter).
    pub fn client_named(&self, name: &str) -> Option<&ExchangeClient> {
        self.multi
            .iter()
            .chain(self.single.iter())
            .find(|a| a.name == name)
            .map(|a| &a.client)
    }

    /// All account runtimes, MULTI first, then SINGLE.
    pub fn accounts(&self) -> impl Iterator<Item = &AccountRuntime> {
        self.multi.iter().chain(self.single.iter())
    }

    async fn try_account(
        account: &AccountRuntime,
        req: &EntryRequest,
        params: &ExecutorParams,
    ) -> AccountFill {
        let pair = account.pair_override.as_deref().unwrap_or(&req.pair);
        let symbol = market_symbol(pair);
        let (sl, tp) = derive_sl_tp(req.side, req.reference_price, req.leverage, params);
        let qty = position_qty(req.balance, req.risk_percent, req.leverage, req.reference_price);

        if qty <= 0.0 {
            return AccountFill {
                account: account.name.clone(),
                opened: false,
                entry_id: None,
                qty,
                sl,
                tp,
                simulated: account.is_simulated(),
                error: Some("computed quantity is zero".to_string()),
            };
        }

        if let Err(e) = account.client.set_leverage(&symbol, req.leverage).await {
            warn!(account = %account.name, symbol, error = %e, "set_leverage failed — continuing");
        }

        match account
            .client
            .open_market(&symbol, req.side, qty, sl, tp)
            .await
        {
            Ok(entry_id) => {
                info!(
                    account = %account.name,
                    symbol,
                    side = %req.side,
                    qty,
                    sl,
                    tp,
                    entry_id = %entry_id,
                    "account entry opened"
                );
                AccountFill {
                    account: account.name.clone(),
                    opened: true,
                    entry_id: Some(entry_id),
                    qty,
                    sl,
                    tp,
                    simulated: account.is_simulated(),
                    error: None,
                }
            }
            Err(e) => {
                warn!(account = %account.name, symbol, error = %e, "account entry failed");
                AccountFill {
                    account: account.name.clone(),
                    opened: false,
                    entry_id: None,
                    qty,
                    sl,
                    tp,
                    simulated: account.is_simulated(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Fan the entry out across accounts.
    pub async fn execute(&self, req: &EntryRequest, params: &ExecutorParams) -> ExecuteOutcome {
        let mut per_account = Vec::new();

        for account in &self.multi {
            per_account.push(Self::try_account(account, req, params).await);
        }

        let multi_opened = per_account.iter().any(|f| f.opened);
        let mut single_ignored = false;

        if let Some(single) = &self.single {
            if multi_opened {
                single_ignored = true;
            } else {
                per_account.push(Self::try_account(single, req, params).await);
            }
        }

        let opened: Vec<&AccountFill> = per_account.iter().filter(|f| f.opened).collect();
        let (sl, tp) = derive_sl_tp(req.side, req.reference_price, req.leverage, params);

        ExecuteOutcome {
            opened_real: !opened.is_empty(),
            entry_ids: opened
                .iter()
                .filter_map(|f| f.entry_id.clone())
                .collect(),
            qty_total: opened.iter().map(|f| f.qty).sum(),
            per_account,
            single_ignored_because_multi_opened: single_ignored,
            sl,
            tp,
        }
    }
}

impl std::fmt::Debug for ExecuteHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteHub")
            .field("multi", &self.multi.len())
            .field("single", &self.single.is_some())
            .finish()
    }
}
