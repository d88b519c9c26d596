/// Core data model for the signal-to-close pipeline
///
/// BuySignal is the normalized output of event parsing; OpenPosition and
/// ClosedPosition are the durable records the watcher supervises; RouteQuote
/// and FillReport are the ephemeral swap-layer results.

use serde::{Deserialize, Serialize};

/// Trading mode: paper fills are synthesized from oracle prices and never
/// touch the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeMode::Paper => write!(f, "paper"),
            TradeMode::Live => write!(f, "live"),
        }
    }
}

/// Routing path that produced a fill; persisted for telemetry and used to
/// decide whether fill reconstruction is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwapStrategy {
    DirectPreferred,
    AnyRoute,
    Bridge,
    VenueFallback,
    Paper,
}

impl std::fmt::Display for SwapStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SwapStrategy::DirectPreferred => "direct-preferred",
            SwapStrategy::AnyRoute => "any-route",
            SwapStrategy::Bridge => "bridge",
            SwapStrategy::VenueFallback => "venue-fallback",
            SwapStrategy::Paper => "paper",
        };
        write!(f, "{s}")
    }
}

/// One qualifying token acquisition by a tracked wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuySignal {
    /// Smart-money wallet that received the tokens
    pub wallet: String,

    /// Mint acquired
    pub mint: String,

    /// Token amount from the event, UI-normalized when the source provides
    /// it, raw atoms otherwise. Always > 0.
    pub amount: u64,

    /// Transaction signature of the observed buy
    pub signature: String,

    /// Native SOL the wallet spent in the same transaction, when visible
    pub sol_spent: Option<f64>,

    /// Source event type tag (SWAP, TRANSFER, ...)
    pub tx_type: Option<String>,
}

/// An open mirrored position; exactly one per mint while active
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub mint: String,

    /// Wallet whose buy we mirrored
    pub origin_wallet: String,

    /// Entry price in USD; null when neither fill nor oracle produced one
    pub entry_price_usd: Option<f64>,

    /// Position size in token atoms
    pub qty_atoms: Option<u64>,

    pub decimals: Option<u8>,

    /// SOL spent opening the position
    pub sol_spent: Option<f64>,

    /// Open timestamp, unix millis
    pub ts_open: i64,

    /// Our buy transaction signature
    pub source_tx: String,

    pub mode: TradeMode,

    pub strategy: SwapStrategy,
}

/// Append-only record of a closed position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub mint: String,
    pub origin_wallet: String,
    pub entry_price_usd: Option<f64>,
    pub qty_atoms: Option<u64>,
    pub decimals: Option<u8>,
    pub sol_spent: Option<f64>,
    pub ts_open: i64,
    pub source_tx: String,
    pub mode: TradeMode,
    pub strategy: SwapStrategy,

    pub exit_price_usd: Option<f64>,

    /// Null when the close had no on-chain leg (settlement timeout, paper)
    pub exit_tx: Option<String>,

    pub ts_close: i64,

    /// (exit - entry) / entry * 100; null unless both prices are finite
    pub pnl_pct: Option<f64>,

    /// `take_profit_<p>%`, `stop_loss_<p>%`, `buy_failed_no_balance`, `manual`
    pub reason: String,
}

/// Resolved route before the swap transaction is built
#[derive(Debug, Clone)]
pub struct RouteQuote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: Option<f64>,
    pub strategy: SwapStrategy,
    /// Aggregator context slot, used for staleness telemetry
    pub context_slot: Option<u64>,
    /// Raw quote payload forwarded verbatim to the swap builder
    pub raw: serde_json::Value,
}

/// Outcome of one executed swap
#[derive(Debug, Clone)]
pub struct FillReport {
    pub signature: String,

    /// Atoms received (buy) or sold (sell); null when reconstruction was
    /// degraded on the venue path
    pub received_atoms: Option<u64>,

    pub decimals: Option<u8>,

    /// Fill-implied USD price when reconstructable
    pub price_usd: Option<f64>,

    pub strategy: SwapStrategy,

    /// RPC endpoint that confirmed the transaction (affinity for meta reads)
    pub endpoint_used: String,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Exit reason strings as logged and persisted
pub fn take_profit_reason(percent: f64) -> String {
    format!("take_profit_{}%", trim_float(percent))
}

pub fn stop_loss_reason(percent: f64) -> String {
    format!("stop_loss_{}%", trim_float(percent))
}

pub const REASON_BUY_FAILED_NO_BALANCE: &str = "buy_failed_no_balance";
pub const REASON_MANUAL: &str = "manual";

fn trim_float(v: f64) -> String {
    if (v.fract()).abs() < 1e-9 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_tags() {
        assert_eq!(SwapStrategy::DirectPreferred.to_string(), "direct-preferred");
        assert_eq!(SwapStrategy::VenueFallback.to_string(), "venue-fallback");
    }

    #[test]
    fn test_exit_reason_strings() {
        assert_eq!(take_profit_reason(20.0), "take_profit_20%");
        assert_eq!(stop_loss_reason(12.5), "stop_loss_12.5%");
    }

    #[test]
    fn test_trade_mode_serde() {
        let m: TradeMode = serde_json::from_str("\"paper\"").unwrap();
        assert_eq!(m, TradeMode::Paper);
        assert_eq!(serde_json::to_string(&TradeMode::Live).unwrap(), "\"live\"");
    }
}
