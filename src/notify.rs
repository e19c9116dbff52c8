// =============================================================================
// Notifier — Telegram-style user notifications and the entry broadcast
// =============================================================================
//
// Thin sendMessage client over the shared reqwest pool. Every send is
// best-effort: failures are logged and swallowed so a notification can never
// break a tick. With no token configured the notifier degrades to log-only,
// which is also what the test suites run against.
// =============================================================================

use tracing::{info, warn};

use crate::engine::executor::ExecuteOutcome;
use crate::engine::OpenPosition;
use crate::tide::gate::CountersSnapshot;
use crate::types::{CloseResult, Side};

/// Telegram-style notification client. The user id doubles as the chat id.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    token: String,
}

impl Notifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
        }
    }

    /// True when a bot token is configured.
    pub fn enabled(&self) -> bool {
        !self.token.is_empty()
    }

    /// Send plain text to the user. Never fails the caller.
    pub async fn send(&self, chat_id: u64, text: &str) {
        if !self.enabled() {
            info!(chat_id, text, "notify (log-only)");
            return;
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let result = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await;

        match result {
            Ok(resp) if !resp.status().is_success() => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(chat_id, %status, body, "notification send failed");
            }
            Ok(_) => {}
            Err(e) => warn!(chat_id, error = %e, "notification request error"),
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("enabled", &self.enabled())
            .finish()
    }
}

// =============================================================================
// Message formatting
// =============================================================================

/// Confirmation broadcast after a successful entry (stage C).
pub fn format_entry_confirmation(
    pair: &str,
    side: Side,
    leverage: u32,
    outcome: &ExecuteOutcome,
    tp_deadline: chrono::DateTime<chrono::Utc>,
    counters: &CountersSnapshot,
    window_id: &str,
    eval_text: &str,
) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "✅ ENTRY {} {} x{} qty {:.6}",
        pair, side, leverage, outcome.qty_total
    ));
    lines.push(format!(
        "SL {:.2} | TP {:.2} | tp-by-time {}",
        outcome.sl,
        outcome.tp,
        tp_deadline.format("%Y-%m-%d %H:%M UTC")
    ));
    for fill in &outcome.per_account {
        let status = if fill.opened {
            fill.entry_id.clone().unwrap_or_else(|| "ok".to_string())
        } else {
            fill.error.clone().unwrap_or_else(|| "failed".to_string())
        };
        lines.push(format!(
            "  {} {} qty {:.6} [{}]{}",
            if fill.opened { "•" } else { "✗" },
            fill.account,
            fill.qty,
            status,
            if fill.simulated { " (sim)" } else { "" },
        ));
    }
    if outcome.single_ignored_because_multi_opened {
        lines.push("  single account skipped (multi opened)".to_string());
    }
    lines.push(format!(
        "window {} | day {}/{} | window {}/{}",
        window_id,
        counters.day_used + 1,
        counters.day_max,
        counters.tw_used + 1,
        counters.tw_max
    ));
    lines.push(String::new());
    lines.push(eval_text.to_string());
    lines.join("\n")
}

/// Notice sent when the TP monitor closes or classifies a position.
pub fn format_close_notice(pos: &OpenPosition, result: CloseResult, price: f64) -> String {
    format!(
        "🔚 CLOSE {} {} result {} @ {:.2} (entry {:.2}, window {})",
        pos.pair, pos.side, result, price, pos.entry_price, pos.window_key
    )
}

/// Notice for a manual-mode signal parked for approval.
pub fn format_pending_created(pid: &str, pair: &str, side: Side, confidence: i64) -> String {
    format!(
        "🕐 PENDING {pid}: {pair} {side} conf {confidence}\napprove with /approve {pid} or /reject {pid}"
    )
}
