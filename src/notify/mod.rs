/// Chat notification adapter (Telegram)
///
/// Every send is best-effort: failures are logged and swallowed, never
/// propagated into the pipeline. Unconfigured credentials disable the
/// adapter silently so dev and paper runs work without a bot.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::core::{BuySignal, ClosedPosition, OpenPosition};

#[derive(Clone)]
pub struct Notifier {
    token: Option<String>,
    chat_id: Option<String>,
    http: Client,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

impl Notifier {
    pub fn new(token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            token,
            chat_id,
            http: Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("notifier http client"),
        }
    }

    pub async fn send(&self, text: &str) {
        let (Some(token), Some(chat_id)) = (self.token.as_deref(), self.chat_id.as_deref()) else {
            return;
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let payload = SendMessage {
            chat_id,
            text,
            disable_web_page_preview: true,
        };

        match self.http.post(&url).json(&payload).send().await {
            Ok(resp) if !resp.status().is_success() => {
                warn!("notify failed: {}", resp.status());
            }
            Err(e) => warn!("notify failed: {e}"),
            _ => {}
        }
    }

    pub async fn signal_detected(&self, signal: &BuySignal) {
        self.send(&format_signal(signal)).await;
    }

    pub async fn position_opened(&self, position: &OpenPosition) {
        self.send(&format_open(position)).await;
    }

    pub async fn position_closed(&self, closed: &ClosedPosition) {
        self.send(&format_close(closed)).await;
    }
}

fn format_signal(signal: &BuySignal) -> String {
    let mut msg = format!(
        "🔔 Buy signal\nwallet: {}\nmint: {}\namount: {}",
        signal.wallet, signal.mint, signal.amount
    );
    if let Some(sol) = signal.sol_spent {
        msg.push_str(&format!("\nsol spent: {sol:.4}"));
    }
    msg.push_str(&format!("\ntx: {}", signal.signature));
    msg
}

fn format_open(position: &OpenPosition) -> String {
    let entry = position
        .entry_price_usd
        .map(|p| format!("${p:.8}"))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "✅ Position opened ({})\nmint: {}\nentry: {}\nmirroring: {}\ntx: {}",
        position.mode, position.mint, entry, position.origin_wallet, position.source_tx
    )
}

fn format_close(closed: &ClosedPosition) -> String {
    let pnl = closed
        .pnl_pct
        .map(|p| format!("{p:+.2}%"))
        .unwrap_or_else(|| "n/a".to_string());
    let tx = closed.exit_tx.as_deref().unwrap_or("none");
    format!(
        "🏁 Position closed\nmint: {}\nreason: {}\npnl: {pnl}\nexit tx: {tx}",
        closed.mint, closed.reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{now_ms, SwapStrategy, TradeMode};

    #[test]
    fn test_signal_message_includes_sol_spent() {
        let signal = BuySignal {
            wallet: "W".into(),
            mint: "M".into(),
            amount: 10_000_000,
            signature: "S1".into(),
            sol_spent: Some(0.25),
            tx_type: Some("SWAP".into()),
        };
        let msg = format_signal(&signal);
        assert!(msg.contains("wallet: W"));
        assert!(msg.contains("sol spent: 0.2500"));
        assert!(msg.contains("tx: S1"));
    }

    #[test]
    fn test_close_message_handles_missing_fields() {
        let closed = ClosedPosition {
            mint: "M".into(),
            origin_wallet: "W".into(),
            entry_price_usd: None,
            qty_atoms: None,
            decimals: None,
            sol_spent: None,
            ts_open: now_ms(),
            source_tx: "S".into(),
            mode: TradeMode::Paper,
            strategy: SwapStrategy::Paper,
            exit_price_usd: None,
            exit_tx: None,
            ts_close: now_ms(),
            pnl_pct: None,
            reason: "buy_failed_no_balance".into(),
        };
        let msg = format_close(&closed);
        assert!(msg.contains("pnl: n/a"));
        assert!(msg.contains("exit tx: none"));
        assert!(msg.contains("buy_failed_no_balance"));
    }
}
