// =============================================================================
// Manual Approval Flow — pending-signal lifecycle
// =============================================================================
//
// In manual mode a passing decision does not execute; it parks a pending
// record with a short id the user echoes back:
//
//   /approve <pid>  -> re-run the tide gate only (the scorer snapshot stays
//                      authoritative); pass => execute + counters + broadcast,
//                      gate fail => EXPIRED_TIDE (terminal, never executes)
//   /reject <pid>   -> REJECTED
//   TTL sweep       -> pendings older than `max_pending_minutes` auto-reject
//
// A user holds at most one pending at a time; resolved records keep their
// terminal status so a repeated approve cannot re-execute.
// =============================================================================

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::decision::GoBundle;
use crate::engine::executor::derive_sl_tp;
use crate::engine::scheduler::{execute_entry_flow, FlowResult};
use crate::engine::EngineState;
use crate::notify::format_pending_created;
use crate::storage::{ManualPending, PendingStatus};

/// Park a passing manual-mode decision as a pending signal. Replaces any
/// previously *resolved* pending; an active one blocks new signals upstream.
pub fn create_pending(state: &EngineState, uid: u64, go: &GoBundle, now: DateTime<Utc>) -> ManualPending {
    let mut user = state.store.get_user(uid, now);
    let cfg = state.config.read().clone();

    let (sl, tp) = derive_sl_tp(
        go.signal,
        go.price_ref,
        user.settings.leverage,
        &cfg.executor,
    );

    let pending = ManualPending {
        pid: Uuid::new_v4().to_string()[..8].to_string(),
        status: PendingStatus::Pending,
        symbol: user.settings.pair.clone(),
        side: go.signal,
        confidence: go.confidence,
        entry_hint: Some(go.price_ref),
        suggested_sl: Some(sl),
        suggested_tp: Some(tp),
        risk_percent: user.settings.risk_percent,
        leverage: user.settings.leverage,
        report_text: go.text.clone(),
        created_at: now,
    };

    user.pending = Some(pending.clone());
    state.store.put_user(uid, user);

    info!(uid, pid = %pending.pid, side = %pending.side, "pending signal created");
    pending
}

/// True when the user has an unresolved pending signal.
pub fn has_active_pending(state: &EngineState, uid: u64, now: DateTime<Utc>) -> bool {
    state
        .store
        .get_user(uid, now)
        .pending
        .map(|p| p.status == PendingStatus::Pending)
        .unwrap_or(false)
}

fn set_pending_status(state: &EngineState, uid: u64, now: DateTime<Utc>, status: PendingStatus) {
    let mut user = state.store.get_user(uid, now);
    if let Some(pending) = user.pending.as_mut() {
        pending.status = status;
    }
    state.store.put_user(uid, user);
}

/// Handle `/approve <pid>`.
pub async fn approve(state: &EngineState, uid: u64, pid: &str, now: DateTime<Utc>) -> Result<String> {
    let user = state.store.get_user(uid, now);
    let Some(pending) = user.pending.clone() else {
        bail!("no pending signal");
    };

    if pending.pid != pid {
        // Unknown pid is an invariant violation: surfaced, never fatal.
        state.push_error(
            format!("approve with unknown pid {pid} (active {})", pending.pid),
            Some("unknown_pid".to_string()),
        );
        bail!("unknown pid {pid}");
    }

    if pending.status != PendingStatus::Pending {
        return Ok(format!("pending {pid} already {}", pending.status));
    }

    let cfg = state.config.read().clone();
    let age_min = (now - pending.created_at).num_minutes();
    if age_min > cfg.max_pending_minutes {
        set_pending_status(state, uid, now, PendingStatus::Rejected);
        return Ok(format!("pending {pid} expired after {age_min}min — rejected"));
    }

    // Re-run the tide gate only; the snapshot payload is authoritative.
    let tide = match state.provider.nearest_event(now).await {
        Ok(t) => t,
        Err(e) => {
            warn!(uid, error = %e, "tide lookup failed during approval");
            None
        }
    };

    let flow = execute_entry_flow(
        state,
        uid,
        pending.side,
        pending.confidence,
        &pending.report_text,
        tide,
        pending.entry_hint.unwrap_or(0.0),
        &format!("approve:{uid}:{pid}"),
        now,
    )
    .await;

    match flow {
        FlowResult::Opened { window_id } => {
            set_pending_status(state, uid, now, PendingStatus::Approved);
            Ok(format!("pending {pid} approved — opened in {window_id}"))
        }
        FlowResult::GateBlocked(reason) => {
            set_pending_status(state, uid, now, PendingStatus::ExpiredTide);
            Ok(format!("pending {pid} expired: {reason}"))
        }
        FlowResult::NotOpened => {
            // Execution failed on every account; the pending stays active so
            // the user may retry.
            Ok(format!("pending {pid}: no account opened — still pending"))
        }
    }
}

/// Handle `/reject <pid>`.
pub fn reject(state: &EngineState, uid: u64, pid: &str, now: DateTime<Utc>) -> Result<String> {
    let user = state.store.get_user(uid, now);
    let Some(pending) = user.pending.clone() else {
        bail!("no pending signal");
    };
    if pending.pid != pid {
        state.push_error(
            format!("reject with unknown pid {pid} (active {})", pending.pid),
            Some("unknown_pid".to_string()),
        );
        bail!("unknown pid {pid}");
    }
    if pending.status != PendingStatus::Pending {
        return Ok(format!("pending {pid} already {}", pending.status));
    }
    set_pending_status(state, uid, now, PendingStatus::Rejected);
    info!(uid, pid, "pending rejected");
    Ok(format!("pending {pid} rejected"))
}

/// Auto-reject a pending that outlived its TTL. Called every tick.
pub async fn sweep_expired(state: &EngineState, uid: u64, now: DateTime<Utc>) {
    let user = state.store.get_user(uid, now);
    let Some(pending) = user.pending else {
        return;
    };
    if pending.status != PendingStatus::Pending {
        return;
    }
    let cfg_max = state.config.read().max_pending_minutes;
    let age_min = (now - pending.created_at).num_minutes();
    if age_min > cfg_max {
        set_pending_status(state, uid, now, PendingStatus::Rejected);
        info!(uid, pid = %pending.pid, age_min, "pending auto-rejected by TTL");
        state
            .notifier
            .send(uid, &format!("pending {} expired after {age_min}min", pending.pid))
            .await;
    }
}

/// Notification text for a freshly created pending.
pub fn pending_notice(pending: &ManualPending) -> String {
    format_pending_created(&pending.pid, &pending.symbol, pending.side, pending.confidence)
}
