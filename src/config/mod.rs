/// Engine configuration
///
/// Everything is sourced from the environment (.env supported) with defaults
/// that keep a fresh checkout in paper mode against public mainnet RPC.
/// Signer material accepts a base58 string or a JSON integer array.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Keypair;
use std::collections::HashSet;

use crate::core::{default_excluded_mints, TradeError, TradeMode};

/// Compute-unit price source for aggregator swaps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PriorityFee {
    /// 75th percentile of recent prioritization fees reported by RPC
    Auto,
    /// Fixed micro-lamports per compute unit
    Fixed(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Mode
    pub trade_mode: TradeMode,

    // Buy sizing
    /// SOL spent per mirrored buy
    pub buy_sol_amount: f64,

    // Exit thresholds
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,

    // Watcher
    /// Tick interval; lower-bounded at 500ms by the watcher itself
    pub price_poll_ms: u64,
    pub buy_settle_timeout_ms: i64,
    pub watcher_base_backoff_ms: u64,
    pub watcher_max_backoff_ms: u64,

    // Aggregator
    pub jupiter_base_url: String,
    pub jupiter_price_url: String,
    pub jup_slippage_bps: u16,
    pub jup_priority_fee: PriorityFee,

    // Detector
    pub buy_debounce_minutes: i64,
    pub excluded_mints: HashSet<String>,
    /// Dust filter against the event's UI amount
    pub min_token_amount: f64,

    // Throttle
    pub min_trade_interval_ms: u64,

    // RPC
    /// Comma-separated HTTP endpoints for the broadcast race
    pub rpc_endpoints: String,
    pub broadcast_max_wait_ms: u64,

    // Signer (raw material; parsed on demand, never logged)
    trader_secret_key: Option<String>,

    // Venue fallback (Pump.fun trade-local)
    pub pump_fallback_enabled: bool,
    pub force_pump_fallback: bool,
    pub pump_slippage_bps: u16,
    pub pump_priority_fee_sol: f64,
    pub pump_pool: String,

    // Wallet selection
    pub tracker_api_url: String,
    pub tracker_api_key: Option<String>,
    pub wallet_min_win_rate: f64,
    pub wallet_max_inactive_hours: i64,
    pub wallet_refresh_minutes: u64,
    /// Cap on how many wallets the webhook tracks
    pub max_tracked_wallets: usize,

    // Helius webhook registration
    pub helius_api_key: Option<String>,
    /// Public URL Helius should push enhanced transactions to
    pub webhook_callback_url: Option<String>,
    /// Shared secret expected in the Authorization header of inbound pushes
    pub webhook_auth_token: Option<String>,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Oracle
    pub dexscreener_fallback: bool,

    // Persistence
    pub data_dir: String,

    // HTTP surface
    pub bind_addr: String,
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|s| s.trim().to_lowercase()) {
        None => default,
        Some(v) if v.is_empty() => default,
        Some(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|x| x.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let trade_mode = match env_string("TRADE_MODE", "paper").to_lowercase().as_str() {
            "live" => TradeMode::Live,
            _ => TradeMode::Paper,
        };

        let buy_sol_amount = env_parse("BUY_SOL_AMOUNT", 0.05_f64);
        if buy_sol_amount <= 0.0 {
            return Err(anyhow!("BUY_SOL_AMOUNT must be positive"));
        }

        let take_profit_percent = env_parse("TAKE_PROFIT_PERCENT", 20.0_f64);
        let stop_loss_percent = env_parse("STOP_LOSS_PERCENT", 12.0_f64);
        if take_profit_percent <= 0.0 || stop_loss_percent == 0.0 {
            return Err(anyhow!("take-profit and stop-loss percents must be non-zero"));
        }

        let jup_priority_fee = match env_string("JUP_PRIORITY_FEE_LAMPORTS", "auto")
            .trim()
            .to_lowercase()
            .as_str()
        {
            "auto" | "" => PriorityFee::Auto,
            v => PriorityFee::Fixed(
                v.parse()
                    .map_err(|_| anyhow!("JUP_PRIORITY_FEE_LAMPORTS must be 'auto' or an integer"))?,
            ),
        };

        let mut excluded_mints: HashSet<String> = default_excluded_mints().into_iter().collect();
        if let Ok(raw) = std::env::var("EXCLUDED_MINTS") {
            for m in raw.split(',') {
                let m = m.trim();
                if !m.is_empty() {
                    excluded_mints.insert(m.to_string());
                }
            }
        }

        let rpc_endpoints = env_string("RPC_ENDPOINTS", "https://api.mainnet-beta.solana.com");

        Ok(Self {
            trade_mode,
            buy_sol_amount,
            take_profit_percent,
            stop_loss_percent,
            price_poll_ms: env_parse("PRICE_POLL_MS", 3_000),
            buy_settle_timeout_ms: env_parse("BUY_SETTLE_TIMEOUT_MS", 45_000_i64),
            watcher_base_backoff_ms: env_parse("WATCHER_BASE_BACKOFF_MS", 1_500),
            watcher_max_backoff_ms: env_parse("WATCHER_MAX_BACKOFF_MS", 60_000),
            jupiter_base_url: env_string("JUPITER_BASE_URL", "https://quote-api.jup.ag/v6"),
            jupiter_price_url: env_string("JUPITER_PRICE_URL", "https://lite-api.jup.ag/price/v3"),
            jup_slippage_bps: env_parse("JUP_SLIPPAGE_BPS", 300_u16),
            jup_priority_fee,
            buy_debounce_minutes: env_parse("BUY_DEBOUNCE_MINUTES", 10_i64),
            excluded_mints,
            min_token_amount: env_parse("MIN_TOKEN_AMOUNT", 0.0_f64),
            min_trade_interval_ms: env_parse("MIN_TRADE_INTERVAL_MS", 1_500),
            rpc_endpoints,
            broadcast_max_wait_ms: env_parse("BROADCAST_MAX_WAIT_MS", 45_000),
            trader_secret_key: std::env::var("TRADER_SECRET_KEY").ok(),
            pump_fallback_enabled: env_bool("PUMP_FALLBACK_ENABLED", true),
            force_pump_fallback: env_bool("FORCE_PUMP_FALLBACK", false),
            pump_slippage_bps: env_parse("PUMP_SLIPPAGE_BPS", 1_000_u16),
            pump_priority_fee_sol: env_parse("PUMP_PRIORITY_FEE_SOL", 0.0005_f64),
            pump_pool: env_string("PUMP_POOL", "auto"),
            tracker_api_url: env_string(
                "TRACKER_API_URL",
                "https://data.solanatracker.io/top-traders/all",
            ),
            tracker_api_key: std::env::var("TRACKER_API_KEY").ok(),
            wallet_min_win_rate: env_parse("WALLET_MIN_WIN_RATE", 55.0_f64),
            wallet_max_inactive_hours: env_parse("WALLET_MAX_INACTIVE_HOURS", 24_i64),
            wallet_refresh_minutes: env_parse("WALLET_REFRESH_MINUTES", 60),
            max_tracked_wallets: env_parse("MAX_TRACKED_WALLETS", 25),
            helius_api_key: std::env::var("HELIUS_API_KEY").ok(),
            webhook_callback_url: std::env::var("WEBHOOK_CALLBACK_URL").ok(),
            webhook_auth_token: std::env::var("WEBHOOK_AUTH_TOKEN").ok(),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
            dexscreener_fallback: env_bool("DEXSCREENER_FALLBACK", true),
            data_dir: env_string("DATA_DIR", "./data"),
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8787"),
        })
    }

    /// Parse the signer. Live mode without valid material is a Config error;
    /// paper mode tolerates its absence (an ephemeral key is generated so
    /// quote calls still have a pubkey to present).
    pub fn load_keypair(&self) -> Result<Keypair, TradeError> {
        let Some(raw) = self.trader_secret_key.as_deref().map(str::trim) else {
            if self.trade_mode == TradeMode::Paper {
                return Ok(Keypair::new());
            }
            return Err(TradeError::Config(
                "TRADER_SECRET_KEY is required in live mode".into(),
            ));
        };

        let bytes: Vec<u8> = if raw.starts_with('[') {
            serde_json::from_str(raw)
                .map_err(|e| TradeError::Config(format!("secret key array: {e}")))?
        } else {
            bs58::decode(raw)
                .into_vec()
                .map_err(|e| TradeError::Config(format!("secret key base58: {e}")))?
        };

        Keypair::from_bytes(&bytes)
            .map_err(|e| TradeError::Config(format!("invalid signer material: {e}")))
    }

    #[cfg(test)]
    pub fn set_secret_key_for_tests(&mut self, raw: Option<String>) {
        self.trader_secret_key = raw;
    }

    pub fn first_rpc_endpoint(&self) -> String {
        self.rpc_endpoints
            .split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("https://api.mainnet-beta.solana.com")
            .to_string()
    }

    pub fn seen_snapshot_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("seen.json")
    }

    pub fn positions_snapshot_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("positions.json")
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data dir {}", self.data_dir))?;
        Ok(())
    }
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        trade_mode: TradeMode::Paper,
        buy_sol_amount: 0.05,
        take_profit_percent: 20.0,
        stop_loss_percent: 12.0,
        price_poll_ms: 3_000,
        buy_settle_timeout_ms: 45_000,
        watcher_base_backoff_ms: 1_500,
        watcher_max_backoff_ms: 60_000,
        jupiter_base_url: "https://quote-api.jup.ag/v6".into(),
        jupiter_price_url: "https://lite-api.jup.ag/price/v3".into(),
        jup_slippage_bps: 300,
        jup_priority_fee: PriorityFee::Auto,
        buy_debounce_minutes: 10,
        excluded_mints: default_excluded_mints().into_iter().collect(),
        min_token_amount: 0.0,
        min_trade_interval_ms: 1_500,
        rpc_endpoints: "https://api.mainnet-beta.solana.com".into(),
        broadcast_max_wait_ms: 45_000,
        trader_secret_key: None,
        pump_fallback_enabled: true,
        force_pump_fallback: false,
        pump_slippage_bps: 1_000,
        pump_priority_fee_sol: 0.0005,
        pump_pool: "auto".into(),
        tracker_api_url: "https://data.solanatracker.io/top-traders/all".into(),
        tracker_api_key: None,
        wallet_min_win_rate: 55.0,
        wallet_max_inactive_hours: 24,
        wallet_refresh_minutes: 60,
        max_tracked_wallets: 25,
        helius_api_key: None,
        webhook_callback_url: None,
        webhook_auth_token: None,
        telegram_bot_token: None,
        telegram_chat_id: None,
        dexscreener_fallback: true,
        data_dir: "./data".into(),
        bind_addr: "127.0.0.1:0".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signer::Signer;

    #[test]
    fn test_paper_mode_generates_ephemeral_signer() {
        let cfg = test_config();
        let kp = cfg.load_keypair().unwrap();
        assert_ne!(kp.pubkey().to_string(), "");
    }

    #[test]
    fn test_live_mode_requires_signer() {
        let mut cfg = test_config();
        cfg.trade_mode = TradeMode::Live;
        let err = cfg.load_keypair().unwrap_err();
        assert!(matches!(err, TradeError::Config(_)));
    }

    #[test]
    fn test_keypair_round_trips_through_json_array() {
        let kp = Keypair::new();
        let json = serde_json::to_string(&kp.to_bytes().to_vec()).unwrap();

        let mut cfg = test_config();
        cfg.trade_mode = TradeMode::Live;
        cfg.set_secret_key_for_tests(Some(json));
        let loaded = cfg.load_keypair().unwrap();
        assert_eq!(loaded.pubkey(), kp.pubkey());
    }

    #[test]
    fn test_keypair_round_trips_through_base58() {
        let kp = Keypair::new();
        let b58 = bs58::encode(kp.to_bytes()).into_string();

        let mut cfg = test_config();
        cfg.trade_mode = TradeMode::Live;
        cfg.set_secret_key_for_tests(Some(b58));
        let loaded = cfg.load_keypair().unwrap();
        assert_eq!(loaded.pubkey(), kp.pubkey());
    }

    #[test]
    fn test_first_rpc_endpoint_skips_blanks() {
        let mut cfg = test_config();
        cfg.rpc_endpoints = " , https://a.example , https://b.example".into();
        assert_eq!(cfg.first_rpc_endpoint(), "https://a.example");
    }
}
