// =============================================================================
// Tideflow Bot — Main Entry Point
// =============================================================================
//
// An automated futures controller gated by tide windows, moon phase and
// multi-timeframe oscillator scoring. The engine starts with whatever the
// state file and config say; accounts without credentials run on paper.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod engine;
mod engine_config;
mod exchange;
mod indicators;
mod market_data;
mod notify;
mod scoring;
mod storage;
mod tide;
mod timeutil;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::engine::scheduler::{run_report_loop, run_scheduler, spawn_supervised};
use crate::engine::EngineState;
use crate::engine_config::EngineConfig;
use crate::notify::Notifier;
use crate::storage::Store;

/// Default config and state file names, sitting next to the binary.
const CONFIG_FILE: &str = "tideflow_config.json";
const STATE_FILE: &str = "bot_state.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            Tideflow Bot — Starting Up                   ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 2. Configuration ─────────────────────────────────────────────────
    let mut config = EngineConfig::load(CONFIG_FILE).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config — using defaults");
        EngineConfig::default()
    });
    config.apply_env_overrides();

    info!(
        tick_sec = config.scheduler_tick_sec,
        tide_window_hours = config.tide_window_hours,
        max_orders_per_day = config.max_orders_per_day,
        max_orders_per_tide_window = config.max_orders_per_tide_window,
        accounts = config.accounts.len(),
        lat = config.lat,
        lon = config.lon,
        "engine configuration"
    );

    // ── 3. Store, notifier, shared state ─────────────────────────────────
    let store = Store::open(STATE_FILE, config.local_tz_offset_hours);
    let notifier = Notifier::new(std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default());
    if !notifier.enabled() {
        warn!("no TELEGRAM_BOT_TOKEN — notifications run log-only");
    }

    let api_bind_addr = config.api_bind_addr.clone();
    let state = Arc::new(EngineState::new(config, store, notifier));

    // ── 4. API server ────────────────────────────────────────────────────
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&api_bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %api_bind_addr, error = %e, "failed to bind API server");
                return;
            }
        };
        info!(addr = %api_bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 5. Scheduler & report loops ──────────────────────────────────────
    let sched_state = state.clone();
    spawn_supervised("scheduler", move || run_scheduler(sched_state.clone()));

    let report_state = state.clone();
    spawn_supervised("report", move || run_report_loop(report_state.clone()));

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    if let Err(e) = state.config.read().save(CONFIG_FILE) {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("Tideflow Bot shut down complete.");
    Ok(())
}
