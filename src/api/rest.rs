// =============================================================================
// REST command surface — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. This is the command ingress the chat
// front-end (external) calls into: mode change, settings update, manual
// order, approve/reject, close, preset application, runtime env override,
// status and log queries.
//
// Mutations funnel through the same engine methods the scheduler uses, and
// acquire the user's tick lock so a command never interleaves with a running
// tick. CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::engine::{approval, sentinel, EngineState};
use crate::engine_config::Preset;
use crate::types::{market_symbol, Side, TradeMode};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<EngineState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/log", get(log_query))
        .route("/api/v1/mode", post(set_mode))
        .route("/api/v1/settings", post(update_settings))
        .route("/api/v1/order", post(manual_order))
        .route("/api/v1/approve", post(approve_pending))
        .route("/api/v1/reject", post(reject_pending))
        .route("/api/v1/close", post(close_position))
        .route("/api/v1/preset", post(apply_preset))
        .route("/api/v1/env", post(env_override))
        .route("/api/v1/sentinel/clear", post(sentinel_clear))
        .layer(cors)
        .with_state(state)
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "ok": false, "error": msg.into() })),
    )
}

fn ok_json(value: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(value))
}

// =============================================================================
// Health & status
// =============================================================================

async fn health(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "server_time": Utc::now().timestamp_millis(),
    }))
}

#[derive(Deserialize)]
struct UidQuery {
    uid: u64,
}

async fn status(
    State(state): State<Arc<EngineState>>,
    Query(q): Query<UidQuery>,
) -> impl IntoResponse {
    let now = Utc::now();
    let cfg = state.config.read().clone();
    let user = state.store.get_user(q.uid, now);
    let day = sentinel::load_day(&state.store, q.uid, now, cfg.local_tz_offset_hours);
    let position = state.open_position(q.uid);

    Json(serde_json::json!({
        "settings": user.settings,
        "today": { "date": user.today.date_str, "count": user.today.count },
        "tide_window_trades": user.tide_window_trades,
        "pending": user.pending,
        "open_position": position,
        "sentinel": {
            "sl_streak": day.sl_streak,
            "locked": day.locked,
            "last_window": day.last_window_key,
        },
    }))
}

async fn log_query(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "recent_errors": state.recent_errors.read().clone(),
    }))
}

// =============================================================================
// Mode & settings
// =============================================================================

#[derive(Deserialize)]
struct ModeRequest {
    uid: u64,
    mode: String,
}

async fn set_mode(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<ModeRequest>,
) -> impl IntoResponse {
    let Ok(mode) = req.mode.parse::<TradeMode>() else {
        return bad_request(format!("unknown mode {}", req.mode));
    };
    let now = Utc::now();
    let _guard = state.user_lock(req.uid).lock_owned().await;
    let mut user = state.store.get_user(req.uid, now);
    user.settings.mode = mode;
    state.store.put_user(req.uid, user);
    info!(uid = req.uid, %mode, "mode changed");
    ok_json(serde_json::json!({ "ok": true, "mode": mode.to_string() }))
}

#[derive(Deserialize)]
struct SettingsRequest {
    uid: u64,
    pair: Option<String>,
    risk_percent: Option<f64>,
    leverage: Option<u32>,
    balance: Option<f64>,
    m5_report_enabled: Option<bool>,
}

async fn update_settings(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<SettingsRequest>,
) -> impl IntoResponse {
    if let Some(risk) = req.risk_percent {
        if !(0.0..=100.0).contains(&risk) {
            return bad_request("risk_percent must be in [0, 100]");
        }
    }
    if let Some(lev) = req.leverage {
        if lev == 0 || lev > 125 {
            return bad_request("leverage must be in [1, 125]");
        }
    }

    let now = Utc::now();
    let _guard = state.user_lock(req.uid).lock_owned().await;
    let mut user = state.store.get_user(req.uid, now);
    if let Some(pair) = req.pair {
        user.settings.pair = pair;
    }
    if let Some(risk) = req.risk_percent {
        user.settings.risk_percent = risk;
    }
    if let Some(lev) = req.leverage {
        user.settings.leverage = lev;
    }
    if let Some(balance) = req.balance {
        user.settings.balance = balance;
    }
    if let Some(enabled) = req.m5_report_enabled {
        user.settings.m5_report_enabled = enabled;
    }
    let settings = user.settings.clone();
    state.store.put_user(req.uid, user);
    info!(uid = req.uid, "settings updated");
    ok_json(serde_json::json!({ "ok": true, "settings": settings }))
}

// =============================================================================
// Manual order
// =============================================================================

#[derive(Deserialize)]
struct OrderRequest {
    uid: u64,
    side: String,
    risk_percent: Option<f64>,
    leverage: Option<u32>,
}

/// Direct manual order: still passes the tide gate and counters, but skips
/// the scorer — the user is the signal.
async fn manual_order(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<OrderRequest>,
) -> impl IntoResponse {
    let Ok(side) = req.side.parse::<Side>() else {
        return bad_request(format!("unknown side {}", req.side));
    };

    let now = Utc::now();
    let _guard = state.user_lock(req.uid).lock_owned().await;

    // Apply one-shot risk/leverage overrides before sizing.
    {
        let mut user = state.store.get_user(req.uid, now);
        if let Some(risk) = req.risk_percent {
            user.settings.risk_percent = risk;
        }
        if let Some(lev) = req.leverage {
            user.settings.leverage = lev;
        }
        state.store.put_user(req.uid, user);
    }

    let user = state.store.get_user(req.uid, now);
    let symbol = market_symbol(&user.settings.pair);
    let price = match state.hub.primary_client() {
        Some(client) => client.fetch_ticker(&symbol).await.unwrap_or(0.0),
        None => 0.0,
    };
    if price <= 0.0 {
        return bad_request("no reference price available");
    }

    let tide = state.provider.nearest_event(now).await.unwrap_or(None);
    let op_id = format!("order:{}:{}", req.uid, crate::timeutil::m5_slot(now));
    let flow = crate::engine::scheduler::execute_entry_flow(
        &state,
        req.uid,
        side,
        0,
        "manual order",
        tide,
        price,
        &op_id,
        now,
    )
    .await;

    ok_json(serde_json::json!({ "ok": true, "result": format!("{flow:?}") }))
}

// =============================================================================
// Approve / reject
// =============================================================================

#[derive(Deserialize)]
struct PendingRequest {
    uid: u64,
    pid: String,
}

async fn approve_pending(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<PendingRequest>,
) -> impl IntoResponse {
    let _guard = state.user_lock(req.uid).lock_owned().await;
    match approval::approve(&state, req.uid, &req.pid, Utc::now()).await {
        Ok(msg) => ok_json(serde_json::json!({ "ok": true, "message": msg })),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn reject_pending(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<PendingRequest>,
) -> impl IntoResponse {
    let _guard = state.user_lock(req.uid).lock_owned().await;
    match approval::reject(&state, req.uid, &req.pid, Utc::now()) {
        Ok(msg) => ok_json(serde_json::json!({ "ok": true, "message": msg })),
        Err(e) => bad_request(e.to_string()),
    }
}

// =============================================================================
// Close
// =============================================================================

#[derive(Deserialize)]
struct CloseRequest {
    uid: u64,
    pct: Option<f64>,
    account: Option<String>,
    side: Option<String>,
}

async fn close_position(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<CloseRequest>,
) -> impl IntoResponse {
    let side_filter = match req.side.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<Side>() {
            Ok(side) => Some(side),
            Err(_) => return bad_request(format!("unknown side {raw}")),
        },
    };
    let pct = req.pct.unwrap_or(100.0);

    let now = Utc::now();
    let _guard = state.user_lock(req.uid).lock_owned().await;
    let user = state.store.get_user(req.uid, now);
    let symbol = market_symbol(&user.settings.pair);

    let mut closed = Vec::new();
    for account in state.hub.accounts() {
        if let Some(filter) = &req.account {
            if &account.name != filter {
                continue;
            }
        }
        match account.client.close_position(&symbol, pct, side_filter).await {
            Ok(()) => closed.push(account.name.clone()),
            Err(e) => warn!(uid = req.uid, account = %account.name, error = %e, "close failed"),
        }
    }

    // A full unfiltered close also drops the tracked position; the monitor
    // will classify a partial one on its next pass.
    if pct >= 100.0 && req.account.is_none() && side_filter.is_none() {
        state.clear_open_position(req.uid);
    }

    ok_json(serde_json::json!({ "ok": true, "closed_accounts": closed }))
}

// =============================================================================
// Preset & env override
// =============================================================================

#[derive(Deserialize)]
struct PresetRequest {
    uid: u64,
    preset: String,
}

async fn apply_preset(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<PresetRequest>,
) -> impl IntoResponse {
    let Ok(preset) = req.preset.parse::<Preset>() else {
        return bad_request(format!("unknown preset {}", req.preset));
    };
    let (risk, leverage, late_only) = preset.tuning();

    let now = Utc::now();
    let _guard = state.user_lock(req.uid).lock_owned().await;
    let mut user = state.store.get_user(req.uid, now);
    user.settings.risk_percent = risk;
    user.settings.leverage = leverage;
    state.store.put_user(req.uid, user);
    state.config.write().entry_late_only = late_only;

    info!(uid = req.uid, preset = %req.preset, "preset applied");
    ok_json(serde_json::json!({
        "ok": true,
        "risk_percent": risk,
        "leverage": leverage,
        "entry_late_only": late_only,
    }))
}

#[derive(Deserialize)]
struct EnvRequest {
    key: String,
    value: String,
}

/// Runtime env override: set the variable, then re-apply the recognized
/// overrides on top of the live config.
async fn env_override(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<EnvRequest>,
) -> impl IntoResponse {
    std::env::set_var(&req.key, &req.value);
    let mut cfg = state.config.read().clone();
    cfg.apply_env_overrides();
    *state.config.write() = cfg;
    info!(key = %req.key, "runtime env override applied");
    ok_json(serde_json::json!({ "ok": true }))
}

// =============================================================================
// Sentinel clear
// =============================================================================

#[derive(Deserialize)]
struct SentinelClearRequest {
    uid: u64,
}

async fn sentinel_clear(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<SentinelClearRequest>,
) -> impl IntoResponse {
    let tz = state.config.read().local_tz_offset_hours;
    sentinel::clear(&state.store, req.uid, Utc::now(), tz);
    // Allow the next lock to notify again.
    state.lock_notified_date.write().remove(&req.uid);
    ok_json(serde_json::json!({ "ok": true }))
}
